//! Per-session form tokens.
//!
//! Library helpers for handing a caller a one-off token tied to its session
//! (e.g. to stamp a form) and checking it on the way back. Tokens accumulate
//! in a JSON string list under a single session key.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use portcullis_common::PortcullisError;
use rand::Rng;

use super::SessionAccess;

/// Generate a token, append it to the list under `key`, and flush the session.
pub fn issue_token(session: &dyn SessionAccess, key: &str) -> Result<String, PortcullisError> {
    let token = generate_token();

    let mut tokens: Vec<String> = session
        .get(key)
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();
    tokens.push(token.clone());

    session.set(key, serde_json::json!(tokens));
    session.save()?;

    Ok(token)
}

/// Check that `token` was previously issued against this session.
pub fn check_token(
    session: &dyn SessionAccess,
    key: &str,
    token: &str,
) -> Result<(), PortcullisError> {
    let tokens: Vec<String> = session
        .get(key)
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();

    if tokens.iter().any(|issued| issued == token) {
        Ok(())
    } else {
        Err(PortcullisError::Auth("invalid session token".to_string()))
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
