//! The fabric's own outward-facing operations: route a query to one node,
//! run a federated search, and forward a chat/action/aggregate call to the
//! node the router picks. This is the surface surrounding collaborators
//! (the host's API layer, a UI backend) call into — not the inter-node wire
//! contract of `ai_engine`.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::FabricError;
use crate::forwarder::ForwardResult;
use crate::http_client::ForwardedContext;
use crate::state::AppState;
use crate::wire::{ActionRequest, AggregateRequest, AggregateResponse, ChatRequest, ChatResponse};

#[derive(Debug, Deserialize, ToSchema)]
pub struct RouteQuery {
    pub query: String,
    pub collection: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteResponse {
    pub node_slug: Option<String>,
    pub reason: String,
    pub explanation: String,
}

#[utoipa::path(
    post,
    path = "/api/fabric/route",
    tag = "fabric",
    request_body = RouteQuery,
    responses((status = 200, description = "Routing decision", body = RouteResponse))
)]
pub async fn route_query(
    State(state): State<AppState>,
    Json(req): Json<RouteQuery>,
) -> Json<RouteResponse> {
    let decision = state
        .router
        .route(&req.query, req.collection.as_deref())
        .await;
    Json(RouteResponse {
        node_slug: decision.node.as_ref().map(|n| n.slug.clone()),
        reason: format!("{:?}", decision.reason),
        explanation: decision.explanation,
    })
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FederatedSearchQuery {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub options: crate::wire::SearchOptions,
}

fn default_limit() -> usize {
    20
}

/// Federated-search response shape (spec §4.12/§8 Scenario 1) — distinct
/// from `wire::SearchResponse`, which is the inter-node `/api/ai-engine/search`
/// wire contract; this is the richer, fleet-level view callers of
/// `/api/fabric/search` get.
#[derive(Debug, Serialize, ToSchema)]
pub struct FederatedSearchResponse {
    pub query: String,
    pub total_results: usize,
    pub results: Vec<crate::wire::WireSearchResult>,
    pub nodes_searched: usize,
    pub node_breakdown: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_breakdown: Option<BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_score: Option<f64>,
    pub fallback: bool,
    pub duration_ms: u64,
    pub cached: bool,
    pub partial: bool,
}

#[utoipa::path(
    post,
    path = "/api/fabric/search",
    tag = "fabric",
    request_body = FederatedSearchQuery,
    responses((status = 200, description = "Merged results across the fleet", body = FederatedSearchResponse))
)]
pub async fn federated_search(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<FederatedSearchQuery>,
) -> Json<FederatedSearchResponse> {
    let ctx = ForwardedContext::from_header_map(&headers);
    let query = req.query.clone();
    let outcome = state
        .search
        .search(&query, req.limit, req.options, ctx)
        .await;

    let node_breakdown: BTreeMap<String, usize> = outcome
        .node_breakdown
        .iter()
        .map(|(id, count)| {
            let label = if *id == Uuid::nil() {
                "local".to_string()
            } else {
                state
                    .registry
                    .get(*id)
                    .map(|n| n.slug)
                    .unwrap_or_else(|| id.to_string())
            };
            (label, *count)
        })
        .collect();

    Json(FederatedSearchResponse {
        query,
        total_results: outcome.count,
        results: outcome.results,
        nodes_searched: outcome.nodes_queried,
        node_breakdown,
        type_breakdown: (!outcome.type_breakdown.is_empty()).then_some(outcome.type_breakdown),
        merge_strategy: Some(state.merger.strategy().as_str().to_string()),
        avg_score: (outcome.count > 0).then_some(outcome.avg_score),
        fallback: outcome.fallback,
        duration_ms: outcome.duration_ms,
        cached: outcome.cached,
        partial: outcome.partial,
    })
}

#[utoipa::path(
    post,
    path = "/api/fabric/chat",
    tag = "fabric",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Chat response from the routed node, wrapped with node/duration/failover metadata"),
        (status = 200, description = "No node could serve the request (`NoAvailableNodes`)")
    )
)]
pub async fn forward_chat(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ForwardResult<ChatResponse>>, FabricError> {
    let collection = req
        .options
        .get("collection")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let decision = state.router.route(&req.message, collection.as_deref()).await;
    let node = decision
        .node
        .ok_or(FabricError::NoAvailableNodes)?;
    let ctx = ForwardedContext::from_header_map(&headers);
    let resp = state
        .forwarder
        .forward_chat(&node, req, ctx, collection.as_deref())
        .await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/fabric/actions",
    tag = "fabric",
    request_body = ActionRequest,
    responses((status = 200, description = "Opaque response from the node named by `data.node_slug`, wrapped with node/duration metadata"))
)]
pub async fn forward_action(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<ActionRequest>,
) -> Result<Json<ForwardResult<serde_json::Value>>, FabricError> {
    let slug = req
        .data
        .get("node_slug")
        .and_then(|v| v.as_str())
        .ok_or_else(|| FabricError::DependencyFailure("action requires data.node_slug".into()))?;
    let node = state
        .registry
        .get_by_slug(slug)
        .ok_or_else(|| FabricError::NodeNotFound(slug.to_string()))?;
    let ctx = ForwardedContext::from_header_map(&headers);
    let resp = state.forwarder.forward_action(&node, req, ctx).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/fabric/aggregate",
    tag = "fabric",
    request_body = AggregateRequest,
    responses((status = 200, description = "Per-collection aggregate from the owning nodes", body = AggregateResponse))
)]
pub async fn forward_aggregate(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(req): Json<AggregateRequest>,
) -> Result<Json<AggregateResponse>, FabricError> {
    let ctx = ForwardedContext::from_header_map(&headers);
    let mut merged = BTreeMap::new();
    for collection in &req.collections {
        let Some(node) = state.registry.find_node_for_collection(collection).await else {
            continue;
        };
        let single = AggregateRequest {
            collections: vec![collection.clone()],
            user_id: req.user_id.clone(),
        };
        match state
            .forwarder
            .forward_aggregate(&node, single, ctx.clone(), Some(collection.as_str()))
            .await
        {
            Ok(resp) => merged.extend(resp.payload.aggregate_data),
            Err(e) => {
                tracing::warn!(collection = %collection, error = %e, "aggregate forward failed");
            }
        }
    }
    Ok(Json(AggregateResponse {
        aggregate_data: merged,
    }))
}
