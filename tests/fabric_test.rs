use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use node_fabric::registry::{NewNode, NodeType};
use node_fabric::state::AppState;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn register_list_and_get_node() {
    let state = AppState::new_test().await;
    let app = node_fabric::create_router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/fabric/nodes")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "name": "Invoicing Node",
                        "base_url": "http://127.0.0.1:9001",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    let id = created.get("id").and_then(|v| v.as_str()).unwrap().to_string();
    assert_eq!(created.get("slug").and_then(|v| v.as_str()), Some("invoicing-node"));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/fabric/nodes")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let list = body_json(response).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/fabric/nodes/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn get_unknown_node_returns_404() {
    let state = AppState::new_test().await;
    let app = node_fabric::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/fabric/nodes/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_slug_registration_is_rejected() {
    let state = AppState::new_test().await;
    let app = node_fabric::create_router(state);

    let body = || {
        Body::from(
            json!({"name": "dup", "slug": "dup", "base_url": "http://127.0.0.1:9002"}).to_string(),
        )
    };

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/fabric/nodes")
                .header("content-type", "application/json")
                .body(body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/fabric/nodes")
                .header("content-type", "application/json")
                .body(body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn ai_engine_surface_rejects_missing_node_token() {
    let state = AppState::new_test().await;
    let app = node_fabric::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/ai-engine/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ai_engine_surface_rejects_garbage_node_token() {
    let state = AppState::new_test().await;
    let app = node_fabric::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/ai-engine/health")
                .header("x-node-token", "not-a-real-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ai_engine_surface_accepts_valid_node_token() {
    let state = AppState::new_test().await;

    let node = state
        .registry
        .register(NewNode {
            name: "Caller".into(),
            slug: Some("caller".into()),
            node_type: NodeType::Child,
            base_url: "http://127.0.0.1:9003".into(),
            weight: 1,
            description: None,
        })
        .await
        .unwrap();
    let token = state.auth.generate_token(&node, None).unwrap();

    let app = node_fabric::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/ai-engine/health")
                .header("x-node-token", token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("ok"));
}

#[tokio::test]
async fn route_query_with_no_nodes_returns_none() {
    let state = AppState::new_test().await;
    let app = node_fabric::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/fabric/route")
                .header("content-type", "application/json")
                .body(Body::from(json!({"query": "invoice question"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json.get("node_slug").unwrap().is_null());
}

#[tokio::test]
async fn federated_search_with_no_nodes_returns_empty_results() {
    let state = AppState::new_test().await;
    let app = node_fabric::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/fabric/search")
                .header("content-type", "application/json")
                .body(Body::from(json!({"query": "invoice question"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json.get("total_results").and_then(|v| v.as_u64()), Some(0));
}

#[tokio::test]
async fn forward_chat_with_no_nodes_reports_no_available_nodes() {
    let state = AppState::new_test().await;
    let app = node_fabric::create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/fabric/chat")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"message": "hello", "session_id": "s1"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    // Mapped to 200 per FabricError::into_response (spec: never an
    // exception to the caller, an empty-result style response instead).
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json.get("error").is_some());
}
