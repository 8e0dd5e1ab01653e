//! Health check endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
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
    redis: bool,
}

/// Readiness check (are all dependencies healthy?)
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    if check_redis(&state).await {
        Ok(Json(ReadyResponse {
            status: "ready",
            redis: true,
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn check_redis(state: &AppState) -> bool {
    let Some(redis) = &state.redis else {
        return false;
    };
    let mut conn = redis.clone();
    let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
    result.is_ok()
}

#[derive(Serialize)]
pub struct StatsResponse {
    server_id: String,
    clustered: bool,
    tracked_nodes: usize,
    uptime_secs: u64,
}

/// Coordinator stats (for monitoring)
pub async fn stats(
    State(state): State<AppState>,
) -> Json<StatsResponse> {
    let coordinator = state.coordinator.read().await;

    Json(StatsResponse {
        server_id: coordinator.server_id().to_string(),
        clustered: coordinator.is_clustered(),
        tracked_nodes: coordinator.tracked_nodes(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
