//! HTTP Client Factory (C3) — builds the single `reqwest::Client` the
//! fabric dials peers with, and defines `PeerClient`, the trait boundary
//! the rest of the core calls through. Mirrors the backend's own pattern of
//! a shared `reqwest::Client` plus small per-call header assembly in
//! `handlers/mod.rs`, generalized into an injectable trait so tests can
//! swap in `MockPeerClient` instead of hitting the network.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::TransportConfig;
use crate::error::FabricError;
use crate::wire::{
    ActionRequest, AggregateRequest, AggregateResponse, ChatRequest, ChatResponse, HealthResponse,
    SearchRequest, SearchResponse, PROPAGATED_HEADERS,
};

/// Headers carried over from the inbound request to each outbound peer call.
/// Built once per request at the handler boundary and threaded through.
#[derive(Debug, Clone, Default)]
pub struct ForwardedContext {
    pub headers: BTreeMap<String, String>,
    pub inbound_bearer: Option<String>,
}

impl ForwardedContext {
    /// Extract the whitelisted headers (spec §4.3) plus the inbound bearer
    /// token (re-sent as `X-User-Authorization`) from an incoming request.
    pub fn from_header_map(headers: &axum::http::HeaderMap) -> Self {
        let mut out = BTreeMap::new();
        for name in PROPAGATED_HEADERS {
            if let Some(v) = headers.get(*name).and_then(|v| v.to_str().ok()) {
                out.insert(name.to_string(), v.to_string());
            }
        }
        let inbound_bearer = headers
            .get(AUTHORIZATION.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|s| s.to_string());
        Self {
            headers: out,
            inbound_bearer,
        }
    }
}

/// Outbound HTTP calls to a peer node. The concrete `reqwest` client lives
/// behind this trait so the rest of the core never constructs a request
/// directly — `search.rs`, `forwarder.rs`, and `registry.rs` (`ping`) only
/// ever see `Arc<dyn PeerClient>`.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn health(&self, base_url: &str, token: &str) -> Result<HealthResponse, FabricError>;

    async fn search(
        &self,
        base_url: &str,
        token: &str,
        req: &SearchRequest,
        ctx: &ForwardedContext,
    ) -> Result<SearchResponse, FabricError>;

    async fn chat(
        &self,
        base_url: &str,
        token: &str,
        req: &ChatRequest,
        ctx: &ForwardedContext,
    ) -> Result<ChatResponse, FabricError>;

    async fn action(
        &self,
        base_url: &str,
        token: &str,
        req: &ActionRequest,
        ctx: &ForwardedContext,
    ) -> Result<serde_json::Value, FabricError>;

    async fn aggregate(
        &self,
        base_url: &str,
        token: &str,
        req: &AggregateRequest,
        ctx: &ForwardedContext,
    ) -> Result<AggregateResponse, FabricError>;
}

/// `reqwest`-backed `PeerClient`. One client is shared across all peers —
/// `reqwest::Client` pools connections internally, so there is no benefit
/// to a client per node.
pub struct HttpPeerClient {
    client: reqwest::Client,
    health_timeout: Duration,
}

impl HttpPeerClient {
    pub fn new(config: &TransportConfig) -> Result<Self, FabricError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| FabricError::TransportFailure(e.to_string()))?;
        Ok(Self {
            client,
            health_timeout: Duration::from_secs(5),
        })
    }

    fn headers(&self, token: &str, ctx: &ForwardedContext) -> Result<HeaderMap, FabricError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-node-token",
            HeaderValue::from_str(token).map_err(|e| FabricError::AuthFailure(e.to_string()))?,
        );
        for (name, value) in &ctx.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        if let Some(bearer) = &ctx.inbound_bearer {
            headers.insert(
                "x-user-authorization",
                HeaderValue::from_str(&format!("Bearer {bearer}"))
                    .map_err(|e| FabricError::AuthFailure(e.to_string()))?,
            );
        }
        Ok(headers)
    }

    async fn post_json<Req: Serialize + ?Sized, Res: DeserializeOwned>(
        &self,
        base_url: &str,
        path: &str,
        token: &str,
        body: &Req,
        ctx: &ForwardedContext,
    ) -> Result<Res, FabricError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let resp = self
            .client
            .post(url)
            .headers(self.headers(token, ctx)?)
            .json(body)
            .send()
            .await?;
        Self::into_typed(resp).await
    }

    async fn into_typed<Res: DeserializeOwned>(resp: reqwest::Response) -> Result<Res, FabricError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FabricError::RemoteNonSuccess {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Res>()
            .await
            .map_err(|e| FabricError::TransportFailure(e.to_string()))
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn health(&self, base_url: &str, token: &str) -> Result<HealthResponse, FabricError> {
        let url = format!("{}/api/ai-engine/health", base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(url)
            .timeout(self.health_timeout)
            .header("x-node-token", token)
            .send()
            .await?;
        Self::into_typed(resp).await
    }

    async fn search(
        &self,
        base_url: &str,
        token: &str,
        req: &SearchRequest,
        ctx: &ForwardedContext,
    ) -> Result<SearchResponse, FabricError> {
        self.post_json(base_url, "/api/ai-engine/search", token, req, ctx)
            .await
    }

    async fn chat(
        &self,
        base_url: &str,
        token: &str,
        req: &ChatRequest,
        ctx: &ForwardedContext,
    ) -> Result<ChatResponse, FabricError> {
        self.post_json(base_url, "/api/ai-engine/chat", token, req, ctx)
            .await
    }

    async fn action(
        &self,
        base_url: &str,
        token: &str,
        req: &ActionRequest,
        ctx: &ForwardedContext,
    ) -> Result<serde_json::Value, FabricError> {
        self.post_json(base_url, "/api/ai-engine/actions", token, req, ctx)
            .await
    }

    async fn aggregate(
        &self,
        base_url: &str,
        token: &str,
        req: &AggregateRequest,
        ctx: &ForwardedContext,
    ) -> Result<AggregateResponse, FabricError> {
        self.post_json(base_url, "/api/ai-engine/aggregate", token, req, ctx)
            .await
    }
}

/// In-memory `PeerClient` keyed by `base_url`, for deterministic tests that
/// never touch the network. Each canned response can carry an artificial
/// delay (via `tokio::time::sleep`) to exercise timeout/cancellation paths.
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    pub enum Canned {
        Health(HealthResponse),
        Search(SearchResponse),
        Chat(ChatResponse),
        Action(serde_json::Value),
        Aggregate(AggregateResponse),
        Fail(String),
    }

    #[derive(Default)]
    pub struct MockPeerClient {
        responses: DashMap<String, (Canned, Duration)>,
        calls: AtomicUsize,
    }

    impl MockPeerClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, base_url: &str, response: Canned) {
            self.responses
                .insert(base_url.to_string(), (response, Duration::ZERO));
        }

        pub fn set_with_delay(&self, base_url: &str, response: Canned, delay: Duration) {
            self.responses.insert(base_url.to_string(), (response, delay));
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }

        async fn resolve(&self, base_url: &str) -> Result<Canned, FabricError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let Some(entry) = self.responses.get(base_url) else {
                return Err(FabricError::TransportFailure(format!(
                    "no canned response for {base_url}"
                )));
            };
            let (canned, delay) = entry.clone();
            drop(entry);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(canned)
        }
    }

    #[async_trait]
    impl PeerClient for MockPeerClient {
        async fn health(&self, base_url: &str, _token: &str) -> Result<HealthResponse, FabricError> {
            match self.resolve(base_url).await? {
                Canned::Health(h) => Ok(h),
                Canned::Fail(msg) => Err(FabricError::TransportFailure(msg)),
                _ => Err(FabricError::TransportFailure("wrong canned kind".into())),
            }
        }

        async fn search(
            &self,
            base_url: &str,
            _token: &str,
            _req: &SearchRequest,
            _ctx: &ForwardedContext,
        ) -> Result<SearchResponse, FabricError> {
            match self.resolve(base_url).await? {
                Canned::Search(s) => Ok(s),
                Canned::Fail(msg) => Err(FabricError::TransportFailure(msg)),
                _ => Err(FabricError::TransportFailure("wrong canned kind".into())),
            }
        }

        async fn chat(
            &self,
            base_url: &str,
            _token: &str,
            _req: &ChatRequest,
            _ctx: &ForwardedContext,
        ) -> Result<ChatResponse, FabricError> {
            match self.resolve(base_url).await? {
                Canned::Chat(c) => Ok(c),
                Canned::Fail(msg) => Err(FabricError::TransportFailure(msg)),
                _ => Err(FabricError::TransportFailure("wrong canned kind".into())),
            }
        }

        async fn action(
            &self,
            base_url: &str,
            _token: &str,
            _req: &ActionRequest,
            _ctx: &ForwardedContext,
        ) -> Result<serde_json::Value, FabricError> {
            match self.resolve(base_url).await? {
                Canned::Action(v) => Ok(v),
                Canned::Fail(msg) => Err(FabricError::TransportFailure(msg)),
                _ => Err(FabricError::TransportFailure("wrong canned kind".into())),
            }
        }

        async fn aggregate(
            &self,
            base_url: &str,
            _token: &str,
            _req: &AggregateRequest,
            _ctx: &ForwardedContext,
        ) -> Result<AggregateResponse, FabricError> {
            match self.resolve(base_url).await? {
                Canned::Aggregate(a) => Ok(a),
                Canned::Fail(msg) => Err(FabricError::TransportFailure(msg)),
                _ => Err(FabricError::TransportFailure("wrong canned kind".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{Canned, MockPeerClient};
    use super::*;

    #[tokio::test]
    async fn mock_peer_client_returns_canned_health() {
        let mock = MockPeerClient::new();
        mock.set(
            "http://child",
            Canned::Health(HealthResponse {
                status: "ok".into(),
                version: "1.0.0".into(),
                capabilities: vec!["search".into()],
                description: None,
                domains: None,
                data_types: None,
                keywords: None,
                collections: None,
                workflows: None,
                autonomous_collectors: None,
            }),
        );
        let resp = mock.health("http://child", "tok").await.unwrap();
        assert_eq!(resp.status, "ok");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn mock_peer_client_surfaces_failures() {
        let mock = MockPeerClient::new();
        mock.set("http://child", Canned::Fail("boom".into()));
        let err = mock.health("http://child", "tok").await.unwrap_err();
        assert!(matches!(err, FabricError::TransportFailure(_)));
    }

    #[test]
    fn forwarded_context_extracts_whitelisted_headers_and_bearer() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-request-id", "req-1".parse().unwrap());
        headers.insert("x-unrelated", "nope".parse().unwrap());
        headers.insert(AUTHORIZATION.as_str(), "Bearer abc123".parse().unwrap());
        let ctx = ForwardedContext::from_header_map(&headers);
        assert_eq!(ctx.headers.get("x-request-id").unwrap(), "req-1");
        assert!(!ctx.headers.contains_key("x-unrelated"));
        assert_eq!(ctx.inbound_bearer.as_deref(), Some("abc123"));
    }
}
