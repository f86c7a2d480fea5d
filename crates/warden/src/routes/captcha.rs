//! CAPTCHA issuance, rendering, and verification endpoints.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
};
use serde::Deserialize;

use portcullis_common::{ChallengeIssued, VerifyOutcome};

use crate::captcha;
use crate::session::Session;
use crate::state::AppState;

/// Issue a new CAPTCHA challenge bound to the caller's session
pub async fn new_challenge(
    State(state): State<AppState>,
    Extension(session): Extension<Arc<Session>>,
) -> Result<Json<ChallengeIssued>, StatusCode> {
    let issued = state
        .generator
        .issue(&state.challenges, Arc::<Session>::downgrade(&session))
        .await
        .map_err(|e| {
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        })?;

    Ok(Json(issued))
}

#[derive(Deserialize)]
pub struct ImageQuery {
    /// Any non-empty value regenerates the digits before serving
    reload: Option<String>,
}

/// Serve the rendered challenge; `{name}` is `<id>.<ext>`
pub async fn serve_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<ImageQuery>,
) -> Result<(HeaderMap, String), StatusCode> {
    render(&state, &name, params.reload.as_deref(), false).await
}

/// Same as `serve_image`, but forces a file download
pub async fn download_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<ImageQuery>,
) -> Result<(HeaderMap, String), StatusCode> {
    render(&state, &name, params.reload.as_deref(), true).await
}

async fn render(
    state: &AppState,
    name: &str,
    reload: Option<&str>,
    download: bool,
) -> Result<(HeaderMap, String), StatusCode> {
    let (id, ext) = split_name(name).ok_or(StatusCode::NOT_FOUND)?;
    if ext != "svg" {
        return Err(StatusCode::NOT_FOUND);
    }

    if reload.is_some_and(|value| !value.is_empty()) {
        state.generator.reload(&state.challenges, id).await;
    }

    let digits = state
        .challenges
        .get_digits(id, false)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    let svg = state.generator.render_svg(&digits);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));

    let content_type = if download {
        "application/octet-stream"
    } else {
        "image/svg+xml"
    };
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));

    Ok((headers, svg))
}

/// "abc123.svg" -> ("abc123", "svg")
fn split_name(name: &str) -> Option<(&str, &str)> {
    let (id, ext) = name.rsplit_once('.')?;
    if id.is_empty() || ext.is_empty() {
        return None;
    }
    Some((id, ext))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    challenge_id: String,
    answer: String,
}

/// Verify a submitted CAPTCHA answer, consuming the challenge
pub async fn verify_challenge(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Json<VerifyOutcome> {
    let ok = captcha::verify_answer(&state.challenges, &payload.challenge_id, &payload.answer).await;

    if ok {
        Json(VerifyOutcome::success())
    } else {
        Json(VerifyOutcome::failure("incorrect or expired challenge"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_splitting() {
        assert_eq!(split_name("abc123.svg"), Some(("abc123", "svg")));
        assert_eq!(split_name("a.b.svg"), Some(("a.b", "svg")));
        assert_eq!(split_name("noext"), None);
        assert_eq!(split_name(".svg"), None);
        assert_eq!(split_name("id."), None);
    }
}
