//! Common error types for Portcullis components.

use thiserror::Error;

/// Common errors across Portcullis components
#[derive(Debug, Error)]
pub enum PortcullisError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Challenge id already registered; the caller should mint a new id and retry
    #[error("Challenge id already registered: {0}")]
    ChallengeExists(String),

    /// Session backend error
    #[error("Session error: {0}")]
    Session(String),

    /// CAPTCHA generation/verification error
    #[error("CAPTCHA error: {0}")]
    Captcha(String),

    /// Authentication/authorization error
    #[error("Auth error: {0}")]
    Auth(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortcullisError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::ChallengeExists(_) => 409,
            Self::Session(_) => 500,
            Self::Captcha(_) => 500,
            Self::Auth(_) => 401,
            Self::InvalidInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        // A colliding challenge id just means the caller should mint another one.
        matches!(self, Self::ChallengeExists(_))
    }
}
