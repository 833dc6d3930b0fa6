pub mod auth;
pub mod balancer;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod forwarder;
pub mod handlers;
pub mod http_client;
pub mod llm;
pub mod matcher;
pub mod merger;
pub mod registry;
pub mod router;
pub mod search;
pub mod state;
pub mod vector;
pub mod watchdog;
pub mod wire;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use handlers::health::metrics_handler;
use state::AppState;

// ═══════════════════════════════════════════════════════════════════════
//  Request correlation ID middleware — Jaskier Shared Pattern
// ═══════════════════════════════════════════════════════════════════════

/// Middleware that generates a UUID v4 correlation ID for each request.
///
/// - Adds it to the current tracing span as `request_id`
/// - Returns it in the `X-Request-Id` response header
/// - Accepts an incoming `X-Request-Id` header to propagate from upstream
async fn request_id_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("request_id", &request_id.as_str());
    tracing::debug!(request_id = %request_id, "request correlation ID assigned");

    let mut response = next.run(req).await;

    if let Ok(header_value) = axum::http::HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", header_value);
    }

    response
}

// ── OpenAPI documentation ────────────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Node Fabric API",
        version = "0.1.0",
        description = "Federated node fabric — registry, circuit breaking, routing, and fan-out search across peer AI nodes",
        license(name = "MIT")
    ),
    paths(
        handlers::fabric_health,
        handlers::fabric_readiness,
        handlers::ai_engine_health,
        handlers::ai_engine_search,
        handlers::ai_engine_chat,
        handlers::ai_engine_action,
        handlers::ai_engine_aggregate,
        handlers::register_node,
        handlers::list_nodes,
        handlers::get_node,
        handlers::unregister_node,
        handlers::update_node_status,
        handlers::ping_node,
        handlers::revoke_node_refresh_token,
        handlers::route_query,
        handlers::federated_search,
        handlers::forward_chat,
        handlers::forward_action,
        handlers::forward_aggregate,
    ),
    components(schemas(
        wire::HealthResponse,
        wire::SearchOptions,
        wire::SearchRequest,
        wire::WireSearchResult,
        wire::SearchResponse,
        wire::ChatRequest,
        wire::ChatResponse,
        wire::ActionRequest,
        wire::AggregateRequest,
        wire::CollectionAggregate,
        wire::AggregateResponse,
        registry::Node,
        registry::NodeType,
        registry::NodeStatus,
        registry::CollectionDescriptor,
        handlers::RegisterNodeRequest,
        handlers::UpdateStatusRequest,
        handlers::RouteQuery,
        handlers::RouteResponse,
        handlers::FederatedSearchQuery,
        handlers::FederatedSearchResponse,
    )),
    tags(
        (name = "health", description = "Process health & readiness"),
        (name = "ai-engine", description = "Inbound inter-node wire contract (spec §6)"),
        (name = "fabric-admin", description = "Node registry administration"),
        (name = "fabric", description = "Outward-facing route/search/chat/action/aggregate operations"),
    )
)]
pub struct ApiDoc;

/// Build the application router with the given shared state. Extracted
/// from `main()` so integration tests can construct the app without
/// binding to a network port.
pub fn create_router(state: AppState) -> Router {
    // Inter-node calls: 120 req/min per caller.
    let rl_ai_engine = GovernorConfigBuilder::default()
        .per_millisecond(500)
        .burst_size(120)
        .finish()
        .expect("rate limiter config: ai_engine");
    // Control-plane ops: tighter, these fan out to many peers per call.
    let rl_ops = GovernorConfigBuilder::default()
        .per_second(1)
        .burst_size(60)
        .finish()
        .expect("rate limiter config: ops");

    // ── Public routes (no auth) ──────────────────────────────────────
    let public = Router::new()
        .route("/api/fabric/health", get(handlers::fabric_health))
        .route("/api/fabric/health/ready", get(handlers::fabric_readiness))
        .route("/api/metrics", get(metrics_handler));

    // ── Inbound wire contract: gated by X-Node-Token ─────────────────
    let ai_engine = Router::new()
        .route("/api/ai-engine/health", get(handlers::ai_engine_health))
        .route("/api/ai-engine/search", post(handlers::ai_engine_search))
        .route("/api/ai-engine/chat", post(handlers::ai_engine_chat))
        .route("/api/ai-engine/actions", post(handlers::ai_engine_action))
        .route(
            "/api/ai-engine/aggregate",
            post(handlers::ai_engine_aggregate),
        )
        .layer(GovernorLayer::new(rl_ai_engine))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_node_token,
        ));

    // ── Registry administration ──────────────────────────────────────
    let admin = Router::new()
        .route(
            "/api/fabric/nodes",
            get(handlers::list_nodes).post(handlers::register_node),
        )
        .route(
            "/api/fabric/nodes/{id}",
            get(handlers::get_node).delete(handlers::unregister_node),
        )
        .route(
            "/api/fabric/nodes/{id}/status",
            patch(handlers::update_node_status),
        )
        .route("/api/fabric/nodes/{id}/ping", post(handlers::ping_node))
        .route(
            "/api/fabric/nodes/{id}/refresh-token",
            delete(handlers::revoke_node_refresh_token),
        );

    // ── Outward-facing fabric operations ─────────────────────────────
    let ops = Router::new()
        .route("/api/fabric/route", post(handlers::route_query))
        .route("/api/fabric/search", post(handlers::federated_search))
        .route("/api/fabric/chat", post(handlers::forward_chat))
        .route("/api/fabric/actions", post(handlers::forward_action))
        .route(
            "/api/fabric/aggregate",
            post(handlers::forward_aggregate),
        )
        .layer(GovernorLayer::new(rl_ops));

    public
        .merge(ai_engine)
        .merge(admin)
        .merge(ops)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state)
}
