//! Cookie validation endpoint.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct ValidateQuery {
    cookie: String,
}

/// Validate a cookie minted by this server or a login token
///
/// Returns:
/// - 200: Decoded payload, with `time` in ms and `dtime` added
/// - 401: Invalid or expired cookie
pub async fn validate_cookie(
    State(state): State<AppState>,
    Query(params): Query<ValidateQuery>,
) -> Result<Json<Value>, StatusCode> {
    state
        .server_cookies
        .decode(&params.cookie)
        .or_else(|| state.login_cookies.decode(&params.cookie))
        .map(|payload| Json(Value::Object(payload)))
        .ok_or(StatusCode::UNAUTHORIZED)
}
