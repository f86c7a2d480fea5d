//! HTTP route handlers for Warden.

use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::session;
use crate::state::AppState;

mod captcha;
mod health;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CAPTCHA endpoints need the caller's session resolved
    let captcha_routes = Router::new()
        .route("/new", get(captcha::new_challenge))
        .route("/verify", post(captcha::verify_challenge))
        .route("/image/{name}", get(captcha::serve_image))
        .route("/download/{name}", get(captcha::download_image))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::attach_session,
        ));

    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/metrics", get(health::metrics))
        // CAPTCHA endpoints
        .nest("/captcha", captcha_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(10)))
                .layer(CorsLayer::permissive()),
        )
        // Add shared state
        .with_state(state)
}
