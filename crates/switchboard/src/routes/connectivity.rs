//! Connectivity lookups.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use meshward_common::{ChannelMask, MeshId, NodeId, NodeState, ServerId};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct NodeQuery {
    node: String,
}

/// Current connectivity of a node
///
/// Returns:
/// - 200: `{meshid, conn, pwr}`
/// - 400: Malformed node id
/// - 404: Node not connected on any channel
pub async fn get_connectivity(
    State(state): State<AppState>,
    Query(params): Query<NodeQuery>,
) -> Result<Json<NodeState>, StatusCode> {
    let node_id = NodeId::parse(params.node).map_err(super::error_status)?;

    state
        .coordinator
        .read()
        .await
        .get_connectivity_state(&node_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
pub struct RouteQuery {
    node: String,
    #[serde(default = "all_channels")]
    mask: u8,
}

fn all_channels() -> u8 {
    ChannelMask::ALL.bits()
}

#[derive(Serialize)]
pub struct RouteResponse {
    server: ServerId,
    #[serde(rename = "meshid")]
    mesh_id: MeshId,
}

/// Peer server that can reach a node over one of the requested channels
pub async fn get_route(
    State(state): State<AppState>,
    Query(params): Query<RouteQuery>,
) -> Result<Json<RouteResponse>, StatusCode> {
    let node_id = NodeId::parse(params.node).map_err(super::error_status)?;
    let mask = ChannelMask::new(params.mask);

    let (server, mesh_id) = state
        .coordinator
        .read()
        .await
        .get_routing_server_id(&node_id, mask)
        .ok_or(StatusCode::NOT_FOUND)?;

    tracing::debug!(node = %node_id, server = %server, "Routing lookup");
    Ok(Json(RouteResponse { server, mesh_id }))
}
