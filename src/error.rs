//! Jaskier Shared Pattern — error
//! Fabric-wide error kinds (spec §7). Every peer-facing operation funnels
//! into `FabricError`; callers at the edge (handlers) decide what, if
//! anything, to surface to the HTTP client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("remote returned non-success status {status}: {body}")]
    RemoteNonSuccess { status: u16, body: String },

    #[error("auth failure: {0}")]
    AuthFailure(String),

    #[error("circuit open for node {0}")]
    CircuitOpen(String),

    #[error("rate limited")]
    RateLimited,

    #[error("no available nodes")]
    NoAvailableNodes,

    #[error("operation timed out")]
    Timeout,

    #[error("cache backend unavailable: {0}")]
    CacheBackendUnavailable(String),

    #[error("dependency failure: {0}")]
    DependencyFailure(String),

    #[error("a node with slug '{0}' is already registered")]
    DuplicateSlug(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),
}

impl FabricError {
    /// Whether this error kind must be recorded as a circuit-breaker failure
    /// per spec §7 ("Always recorded"): transport/non-success/timeout.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            FabricError::TransportFailure(_)
                | FabricError::RemoteNonSuccess { .. }
                | FabricError::Timeout
        )
    }
}

impl From<reqwest::Error> for FabricError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FabricError::Timeout
        } else {
            FabricError::TransportFailure(e.to_string())
        }
    }
}

impl From<jsonwebtoken::errors::Error> for FabricError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        FabricError::AuthFailure(e.to_string())
    }
}

impl From<sqlx::Error> for FabricError {
    fn from(e: sqlx::Error) -> Self {
        FabricError::CacheBackendUnavailable(e.to_string())
    }
}

/// `NoAvailableNodes` surfaces as an empty-result response, never an
/// exception; `AuthFailure` only surfaces on administrative APIs. This impl
/// backs those administrative handlers — the federated search/route paths
/// never let a `FabricError` reach `IntoResponse` (they recover locally).
impl IntoResponse for FabricError {
    fn into_response(self) -> Response {
        let status = match &self {
            FabricError::AuthFailure(_) => StatusCode::UNAUTHORIZED,
            FabricError::NoAvailableNodes => StatusCode::OK,
            FabricError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            FabricError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            FabricError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            FabricError::DuplicateSlug(_) => StatusCode::CONFLICT,
            FabricError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
