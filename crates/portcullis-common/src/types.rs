//! Core types shared across Portcullis components.

use serde::{Deserialize, Serialize};

/// A freshly issued CAPTCHA challenge, as sent to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeIssued {
    /// Unique challenge ID
    pub challenge_id: String,

    /// URL the client fetches the rendered challenge from
    pub image_url: String,

    /// Challenge expiry timestamp (Unix epoch seconds); 0 when expiry is disabled
    pub expires_at: i64,
}

impl ChallengeIssued {
    pub fn new(challenge_id: String, ttl_secs: u64) -> Self {
        let image_url = format!("/captcha/image/{challenge_id}.svg");
        let expires_at = if ttl_secs == 0 {
            0
        } else {
            chrono::Utc::now().timestamp() + ttl_secs as i64
        };

        Self {
            challenge_id,
            image_url,
            expires_at,
        }
    }
}

/// CAPTCHA verification outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl VerifyOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
        }
    }
}
