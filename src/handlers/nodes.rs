//! Registry administration — register, list, inspect, and unregister peer
//! nodes. Not part of the inter-node wire contract (spec §6); this is the
//! surface the host's own control plane (or an operator) uses to manage
//! the fleet.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::FabricError;
use crate::registry::{Node, NewNode, NodeStatus, NodeType};
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterNodeRequest {
    pub name: String,
    pub slug: Option<String>,
    #[serde(default = "default_node_type")]
    pub node_type: NodeType,
    pub base_url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    pub description: Option<String>,
}

fn default_node_type() -> NodeType {
    NodeType::Child
}

fn default_weight() -> u32 {
    1
}

#[utoipa::path(
    post,
    path = "/api/fabric/nodes",
    tag = "fabric-admin",
    request_body = RegisterNodeRequest,
    responses(
        (status = 200, description = "Node registered", body = Node),
        (status = 409, description = "Slug already registered")
    )
)]
pub async fn register_node(
    State(state): State<AppState>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<Node>, FabricError> {
    let node = state
        .registry
        .register(NewNode {
            name: req.name,
            slug: req.slug,
            node_type: req.node_type,
            base_url: req.base_url,
            weight: req.weight,
            description: req.description,
        })
        .await?;
    Ok(Json(node))
}

#[utoipa::path(
    get,
    path = "/api/fabric/nodes",
    tag = "fabric-admin",
    responses((status = 200, description = "All registered nodes", body = [Node]))
)]
pub async fn list_nodes(State(state): State<AppState>) -> Json<Vec<Node>> {
    Json(state.registry.all())
}

#[utoipa::path(
    get,
    path = "/api/fabric/nodes/{id}",
    tag = "fabric-admin",
    responses(
        (status = 200, description = "Node detail", body = Node),
        (status = 404, description = "No such node")
    )
)]
pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Node>, FabricError> {
    state
        .registry
        .get(id)
        .map(Json)
        .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))
}

#[utoipa::path(
    delete,
    path = "/api/fabric/nodes/{id}",
    tag = "fabric-admin",
    responses(
        (status = 204, description = "Node unregistered"),
        (status = 404, description = "No such node")
    )
)]
pub async fn unregister_node(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, FabricError> {
    state.registry.unregister(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateStatusRequest {
    pub status: NodeStatus,
}

#[utoipa::path(
    patch,
    path = "/api/fabric/nodes/{id}/status",
    tag = "fabric-admin",
    request_body = UpdateStatusRequest,
    responses(
        (status = 204, description = "Status updated"),
        (status = 404, description = "No such node")
    )
)]
pub async fn update_node_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<axum::http::StatusCode, FabricError> {
    state.registry.update_status(id, req.status).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/fabric/nodes/{id}/ping",
    tag = "fabric-admin",
    responses(
        (status = 200, description = "Ping result (true = healthy)"),
        (status = 404, description = "No such node")
    )
)]
pub async fn ping_node(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<bool>, FabricError> {
    Ok(Json(state.registry.ping(id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/fabric/nodes/{id}/refresh-token",
    tag = "fabric-admin",
    responses(
        (status = 204, description = "Refresh token revoked"),
        (status = 404, description = "No such node")
    )
)]
pub async fn revoke_node_refresh_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, FabricError> {
    state.registry.revoke_refresh_token(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
