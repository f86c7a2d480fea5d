//! Health check endpoints.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
}

/// Readiness check. Warden keeps all state in memory, so "up" means ready.
pub async fn ready_check() -> Json<ReadyResponse> {
    Json(ReadyResponse { status: "ready" })
}

#[derive(Serialize)]
pub struct MetricsResponse {
    live_challenges: usize,
    live_sessions: usize,
    uptime_secs: u64,
}

/// Metrics endpoint (for monitoring)
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(MetricsResponse {
        live_challenges: state.challenges.live_count().await,
        live_sessions: state.sessions.len().await,
        uptime_secs: uptime,
    })
}
