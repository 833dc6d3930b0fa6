//! Ambient health/readiness/metrics endpoints — carried regardless of the
//! spec's feature Non-goals, mirroring the backend's own `health_check` /
//! `readiness` / `metrics_handler` trio.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/fabric/health",
    tag = "health",
    responses((status = 200, description = "Process-level health"))
)]
pub async fn fabric_health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let nodes = state.registry.all();
    let active = nodes.iter().filter(|n| n.status == crate::registry::NodeStatus::Active).count();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "nodes_total": nodes.len(),
        "nodes_active": active,
        "breakers_open": state.breakers.open_count(),
        "cache_entries": state.cache.len(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/fabric/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Fabric is ready"),
        (status = 503, description = "Fabric not yet ready")
    )
)]
pub async fn fabric_readiness(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if state.is_ready() {
        Ok(Json(json!({ "ready": true })))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> String {
    let nodes = state.registry.all();
    let active = nodes.iter().filter(|n| n.status == crate::registry::NodeStatus::Active).count();
    format!(
        "# HELP fabric_nodes_total Total registered nodes\n\
         # TYPE fabric_nodes_total gauge\n\
         fabric_nodes_total {}\n\
         # HELP fabric_nodes_active Active (healthy) nodes\n\
         # TYPE fabric_nodes_active gauge\n\
         fabric_nodes_active {}\n\
         # HELP fabric_breakers_open Open circuit breakers\n\
         # TYPE fabric_breakers_open gauge\n\
         fabric_breakers_open {}\n\
         # HELP fabric_cache_entries In-process cache entries\n\
         # TYPE fabric_cache_entries gauge\n\
         fabric_cache_entries {}\n\
         # HELP fabric_uptime_seconds Process uptime in seconds\n\
         # TYPE fabric_uptime_seconds counter\n\
         fabric_uptime_seconds {}\n",
        nodes.len(),
        active,
        state.breakers.open_count(),
        state.cache.len(),
        state.start_time.elapsed().as_secs(),
    )
}
