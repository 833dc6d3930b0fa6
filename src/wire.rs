//! Wire types for the inter-node HTTP surface (spec §6). Shared by the
//! outbound `PeerClient` implementations and the inbound `axum` handlers so
//! both sides of a node-to-node call agree on shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflows: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autonomous_collectors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SearchOptions {
    pub collections: Option<Vec<String>>,
    pub filters: Option<Value>,
    pub threshold: Option<f64>,
    pub user_id: Option<String>,
    pub skip_user_filter: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    #[serde(default)]
    pub options: SearchOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WireSearchResult {
    pub id: String,
    pub content: String,
    pub score: f64,
    pub model_class: Option<String>,
    pub model_type: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchResponse {
    pub results: Vec<WireSearchResult>,
    pub count: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default)]
    pub metadata: Value,
    pub credits_used: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActionRequest {
    pub action_type: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AggregateRequest {
    pub collections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CollectionAggregate {
    pub count: u64,
    pub indexed_count: u64,
    pub display_name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AggregateResponse {
    pub aggregate_data: std::collections::BTreeMap<String, CollectionAggregate>,
}

/// Headers inbound requests may carry that are propagated to peer calls
/// verbatim (spec §4.3), plus the special-cased inbound Bearer token which
/// is re-sent as `X-User-Authorization` to avoid clashing with node auth.
pub const PROPAGATED_HEADERS: &[&str] = &[
    "x-request-id",
    "x-trace-id",
    "x-correlation-id",
    "x-user-id",
    "x-tenant-id",
    "x-workspace-id",
    "active-workspace",
    "accept-language",
    "user-agent",
    "referer",
];
