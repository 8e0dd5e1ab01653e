//! HTTP route handlers for Switchboard.

use axum::{
    Router,
    http::StatusCode,
    routing::get,
};
use meshward_common::MeshError;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod connectivity;
mod cookie;
mod health;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/stats", get(health::stats))

        // Connectivity lookups
        .route("/connectivity", get(connectivity::get_connectivity))
        .route("/connectivity/route", get(connectivity::get_route))

        // Cookie validation (for reverse proxies and session handlers)
        .route("/validate", get(cookie::validate_cookie))

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Map a rejected request parameter onto its HTTP status
fn error_status(error: MeshError) -> StatusCode {
    StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_REQUEST)
}
