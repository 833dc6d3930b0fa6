//! Inbound `/api/ai-engine/*` — what this node answers when another node's
//! registry pings it, forwards chat to it, or fans a search out to it
//! (spec §6). Gated by `auth::require_node_token`.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;
use crate::wire::{
    ActionRequest, AggregateRequest, AggregateResponse, ChatRequest, ChatResponse, HealthResponse,
    SearchRequest, SearchResponse,
};

#[utoipa::path(
    get,
    path = "/api/ai-engine/health",
    tag = "ai-engine",
    responses((status = 200, description = "This node's advertised health/metadata", body = HealthResponse))
)]
pub async fn ai_engine_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let local = state.discovery.local_metadata();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: local.capabilities.clone(),
        description: None,
        domains: Some(local.domains.clone()),
        data_types: Some(local.data_types.clone()),
        keywords: Some(local.keywords.clone()),
        collections: Some(local.collections.iter().map(|c| c.name.clone()).collect()),
        workflows: None,
        autonomous_collectors: None,
    })
}

#[utoipa::path(
    post,
    path = "/api/ai-engine/search",
    tag = "ai-engine",
    request_body = SearchRequest,
    responses((status = 200, description = "This node's own search results", body = SearchResponse))
)]
pub async fn ai_engine_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Json<SearchResponse> {
    let started = std::time::Instant::now();
    let results = state
        .search
        .serve_inbound_search(&req.query, req.limit, &req.options)
        .await;
    let count = results.len();
    Json(SearchResponse {
        results,
        count,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Chat is answered locally via the configured LLM, if any — there is no
/// fabric-owned notion of conversation state or billing, both of which
/// belong to the host (spec §1, out of scope).
#[utoipa::path(
    post,
    path = "/api/ai-engine/chat",
    tag = "ai-engine",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Chat response", body = ChatResponse),
        (status = 503, description = "No LLM configured on this node")
    )
)]
pub async fn ai_engine_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, crate::error::FabricError> {
    let llm = state.router.llm();
    let Some(llm) = llm else {
        return Err(crate::error::FabricError::DependencyFailure(
            "no LLM configured for chat on this node".into(),
        ));
    };
    let response = llm.complete(&req.message, None).await?;
    Ok(Json(ChatResponse {
        response,
        metadata: json!({ "session_id": req.session_id }),
        credits_used: 0.0,
    }))
}

/// Action execution is entirely host-defined (spec §1: "the core consumes
/// these through interfaces"); the fabric itself only guarantees the call
/// lands on exactly this node and acknowledges receipt.
#[utoipa::path(
    post,
    path = "/api/ai-engine/actions",
    tag = "ai-engine",
    request_body = ActionRequest,
    responses((status = 200, description = "Opaque acknowledgement"))
)]
pub async fn ai_engine_action(Json(req): Json<ActionRequest>) -> Json<Value> {
    Json(json!({
        "accepted": true,
        "action_type": req.action_type,
    }))
}

#[utoipa::path(
    post,
    path = "/api/ai-engine/aggregate",
    tag = "ai-engine",
    request_body = AggregateRequest,
    responses((status = 200, description = "Per-collection record counts", body = AggregateResponse))
)]
pub async fn ai_engine_aggregate(
    State(state): State<AppState>,
    Json(req): Json<AggregateRequest>,
) -> Json<AggregateResponse> {
    let local = state.discovery.local_metadata();
    let mut aggregate_data = std::collections::BTreeMap::new();
    for name in &req.collections {
        if let Some(descriptor) = local.collections.iter().find(|c| &c.name == name) {
            aggregate_data.insert(
                name.clone(),
                crate::wire::CollectionAggregate {
                    count: 0,
                    indexed_count: 0,
                    display_name: descriptor
                        .display_name
                        .clone()
                        .unwrap_or_else(|| descriptor.name.clone()),
                    description: descriptor.description.clone().unwrap_or_default(),
                },
            );
        }
    }
    Json(AggregateResponse { aggregate_data })
}
