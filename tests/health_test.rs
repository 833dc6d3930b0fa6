// Jaskier Shared Pattern -- backend integration test

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use node_fabric::state::AppState;

async fn test_app() -> axum::Router {
    let state = AppState::new_test().await;
    node_fabric::create_router(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let response = test_app()
        .await
        .oneshot(
            Request::builder()
                .uri("/api/fabric/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_endpoint_returns_json_with_status_field() {
    let response = test_app()
        .await
        .oneshot(
            Request::builder()
                .uri("/api/fabric/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("healthy"));
    assert_eq!(json.get("nodes_total").and_then(|v| v.as_u64()), Some(0));
}

#[tokio::test]
async fn readiness_returns_503_before_mark_ready() {
    let response = test_app()
        .await
        .oneshot(
            Request::builder()
                .uri("/api/fabric/health/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let response = test_app()
        .await
        .oneshot(
            Request::builder()
                .uri("/api/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("fabric_nodes_total"));
}

#[tokio::test]
async fn nonexistent_route_returns_404() {
    let response = test_app()
        .await
        .oneshot(
            Request::builder()
                .uri("/api/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
