//! Forwarder (C9) — dispatches a single chat/search/action call to one
//! node, with retry/backoff and (for chat/search) failover to an alternate
//! node owning the same collection. Mirrors the backend's own
//! `send_to_anthropic` pattern (breaker gate, send, retry-with-backoff on
//! failure, breaker re-notified either way) generalized from a fixed 2s
//! backoff and single upstream to exponential backoff across `max_retries`
//! attempts against any node in the registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use crate::auth::AuthService;
use crate::breaker::BreakerRegistry;
use crate::config::ForwarderConfig;
use crate::error::FabricError;
use crate::http_client::{ForwardedContext, PeerClient};
use crate::registry::{Node, Registry};
use crate::wire::{
    ActionRequest, AggregateRequest, AggregateResponse, ChatRequest, ChatResponse, SearchRequest,
    SearchResponse,
};

/// Uniform shape for every forwarded call (spec §4.9): which node actually
/// served the request, how long it took, and — if the primary was
/// unreachable — which node it failed over from. A fatal, zero-attempt
/// failure (e.g. no candidate at all) stays an `Err(FabricError)` instead
/// of a `success: false` variant of this type.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardResult<T> {
    pub success: bool,
    pub node: String,
    pub duration_ms: u64,
    pub payload: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failover_from: Option<String>,
}

impl<T> ForwardResult<T> {
    fn new(primary: &Node, served: &Node, elapsed: Duration, payload: T) -> Self {
        Self {
            success: true,
            node: served.slug.clone(),
            duration_ms: elapsed.as_millis() as u64,
            payload,
            failover_from: (served.id != primary.id).then(|| primary.slug.clone()),
        }
    }
}

pub struct Forwarder {
    registry: Arc<Registry>,
    breakers: Arc<BreakerRegistry>,
    peer_client: Arc<dyn PeerClient>,
    auth: Arc<AuthService>,
    config: ForwarderConfig,
}

impl Forwarder {
    pub fn new(
        registry: Arc<Registry>,
        breakers: Arc<BreakerRegistry>,
        peer_client: Arc<dyn PeerClient>,
        auth: Arc<AuthService>,
        config: ForwarderConfig,
    ) -> Self {
        Self {
            registry,
            breakers,
            peer_client,
            auth,
            config,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.config.backoff_base_ms * 2u64.pow(attempt.saturating_sub(1)))
    }

    /// Wraps one attempt: connection accounting (increment before dispatch,
    /// decrement on every exit path), breaker admission, and breaker
    /// recording of the outcome.
    async fn attempt<T, F, Fut>(&self, node: &Node, call: F) -> Result<T, FabricError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, FabricError>>,
    {
        if self.breakers.is_open(node.id) {
            return Err(FabricError::CircuitOpen(node.slug.clone()));
        }
        self.registry.inc_active_connections(node.id);
        let result = call().await;
        self.registry.dec_active_connections(node.id);

        match &result {
            Ok(_) => self.breakers.record_success(node.id),
            Err(e) if e.is_breaker_failure() => self.breakers.record_failure(node.id),
            Err(_) => {}
        }
        result
    }

    /// Generic retry+failover driver. `candidates` is tried in order;
    /// within each candidate, up to `max_retries` additional attempts are
    /// made with exponential backoff before moving to the next candidate.
    /// `allow_failover` disables moving past the first candidate — actions
    /// must land on exactly the node the caller specified.
    async fn dispatch<T, F, Fut>(
        &self,
        candidates: &[Node],
        allow_failover: bool,
        mut call: F,
    ) -> Result<(T, Node, Duration), FabricError>
    where
        F: FnMut(Node) -> Fut,
        Fut: std::future::Future<Output = Result<T, FabricError>>,
    {
        if candidates.is_empty() {
            return Err(FabricError::NoAvailableNodes);
        }
        let pool = if allow_failover { candidates } else { &candidates[..1] };
        let started = Instant::now();

        let mut last_err = FabricError::NoAvailableNodes;
        for node in pool {
            for attempt in 1..=(self.config.max_retries + 1) {
                let node = node.clone();
                let fut = call(node.clone());
                match self.attempt(&node, || fut).await {
                    Ok(v) => return Ok((v, node, started.elapsed())),
                    Err(e) => {
                        warn!(node_id = %node.id, attempt, error = %e, "forward attempt failed");
                        last_err = e;
                        if attempt <= self.config.max_retries {
                            tokio::time::sleep(self.backoff(attempt)).await;
                        }
                    }
                }
            }
        }
        Err(last_err)
    }

    /// Nodes that could serve this request, in priority order: `primary`
    /// first, then other active nodes (failover). When `collection` is
    /// given, failover is restricted to active nodes that also own that
    /// collection (spec §4.9); with no collection context, any other
    /// active node qualifies, since chat/search can be answered generically.
    async fn failover_candidates(&self, primary: &Node, collection: Option<&str>) -> Vec<Node> {
        let mut out = vec![primary.clone()];
        for n in self.registry.get_active_nodes().await {
            if n.id == primary.id {
                continue;
            }
            match collection {
                Some(c) if !Registry::node_owns_collection(&n, c) => continue,
                _ => out.push(n),
            }
        }
        out
    }

    pub async fn forward_chat(
        &self,
        node: &Node,
        req: ChatRequest,
        ctx: ForwardedContext,
        collection: Option<&str>,
    ) -> Result<ForwardResult<ChatResponse>, FabricError> {
        let candidates = self.failover_candidates(node, collection).await;
        let auth = self.auth.clone();
        let peer = self.peer_client.clone();
        let (payload, served, elapsed) = self
            .dispatch(&candidates, true, move |n| {
                let req = req.clone();
                let ctx = ctx.clone();
                let auth = auth.clone();
                let peer = peer.clone();
                async move {
                    let token = auth.generate_token(&n, None)?;
                    peer.chat(&n.base_url, &token, &req, &ctx).await
                }
            })
            .await?;
        Ok(ForwardResult::new(node, &served, elapsed, payload))
    }

    pub async fn forward_search(
        &self,
        node: &Node,
        req: SearchRequest,
        ctx: ForwardedContext,
        collection: Option<&str>,
    ) -> Result<ForwardResult<SearchResponse>, FabricError> {
        let candidates = self.failover_candidates(node, collection).await;
        let auth = self.auth.clone();
        let peer = self.peer_client.clone();
        let (payload, served, elapsed) = self
            .dispatch(&candidates, true, move |n| {
                let req = req.clone();
                let ctx = ctx.clone();
                let auth = auth.clone();
                let peer = peer.clone();
                async move {
                    let token = auth.generate_token(&n, None)?;
                    peer.search(&n.base_url, &token, &req, &ctx).await
                }
            })
            .await?;
        Ok(ForwardResult::new(node, &served, elapsed, payload))
    }

    /// Read-only, like search: allowed to fail over to any active node
    /// owning the same collection.
    pub async fn forward_aggregate(
        &self,
        node: &Node,
        req: AggregateRequest,
        ctx: ForwardedContext,
        collection: Option<&str>,
    ) -> Result<ForwardResult<AggregateResponse>, FabricError> {
        let candidates = self.failover_candidates(node, collection).await;
        let auth = self.auth.clone();
        let peer = self.peer_client.clone();
        let (payload, served, elapsed) = self
            .dispatch(&candidates, true, move |n| {
                let req = req.clone();
                let ctx = ctx.clone();
                let auth = auth.clone();
                let peer = peer.clone();
                async move {
                    let token = auth.generate_token(&n, None)?;
                    peer.aggregate(&n.base_url, &token, &req, &ctx).await
                }
            })
            .await?;
        Ok(ForwardResult::new(node, &served, elapsed, payload))
    }

    /// Actions are side-effecting and must land on exactly `node` — no
    /// failover (spec §4.9).
    pub async fn forward_action(
        &self,
        node: &Node,
        req: ActionRequest,
        ctx: ForwardedContext,
    ) -> Result<ForwardResult<serde_json::Value>, FabricError> {
        let candidates = vec![node.clone()];
        let auth = self.auth.clone();
        let peer = self.peer_client.clone();
        let (payload, served, elapsed) = self
            .dispatch(&candidates, false, move |n| {
                let req = req.clone();
                let ctx = ctx.clone();
                let auth = auth.clone();
                let peer = peer.clone();
                async move {
                    let token = auth.generate_token(&n, None)?;
                    peer.action(&n.base_url, &token, &req, &ctx).await
                }
            })
            .await?;
        Ok(ForwardResult::new(node, &served, elapsed, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::config::{AuthConfig, BreakerConfig};
    use crate::http_client::mock::{Canned, MockPeerClient};
    use crate::registry::{InMemoryNodeStore, NewNode, NodeStore, NodeType, RegistryConfig};
    use serde_json::json;

    async fn setup() -> (Arc<Registry>, Arc<BreakerRegistry>, Arc<MockPeerClient>, Arc<AuthService>) {
        let mock = Arc::new(MockPeerClient::new());
        let store: Arc<dyn NodeStore> = Arc::new(InMemoryNodeStore::new());
        let auth = Arc::new(AuthService::new(AuthConfig {
            jwt_secret: "s3cret".into(),
            ..Default::default()
        }));
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let registry = Arc::new(
            Registry::load(
                store,
                mock.clone() as Arc<dyn PeerClient>,
                auth.clone(),
                breakers.clone(),
                RegistryConfig::default(),
                None,
                None,
            )
            .await
            .unwrap(),
        );
        (registry, breakers, mock, auth)
    }

    #[tokio::test]
    async fn forward_action_never_fails_over() {
        let (registry, breakers, mock, auth) = setup().await;
        let primary = registry
            .register(NewNode {
                name: "Primary".into(),
                slug: None,
                node_type: NodeType::Child,
                base_url: "http://primary".into(),
                weight: 1,
                description: None,
            })
            .await
            .unwrap();
        mock.set("http://primary", Canned::Fail("down".into()));

        let forwarder = Forwarder::new(
            registry.clone(),
            breakers,
            mock.clone() as Arc<dyn PeerClient>,
            auth,
            ForwarderConfig {
                max_retries: 0,
                backoff_base_ms: 1,
            },
        );
        let err = forwarder
            .forward_action(
                &primary,
                ActionRequest {
                    action_type: "noop".into(),
                    data: json!({}),
                    session_id: None,
                    user_id: None,
                },
                ForwardedContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::TransportFailure(_)));
    }

    #[tokio::test]
    async fn forward_search_fails_over_to_next_active_node() {
        let (registry, breakers, mock, auth) = setup().await;
        let primary = registry
            .register(NewNode {
                name: "Primary".into(),
                slug: None,
                node_type: NodeType::Child,
                base_url: "http://primary".into(),
                weight: 1,
                description: None,
            })
            .await
            .unwrap();
        let backup = registry
            .register(NewNode {
                name: "Backup".into(),
                slug: None,
                node_type: NodeType::Child,
                base_url: "http://backup".into(),
                weight: 1,
                description: None,
            })
            .await
            .unwrap();
        registry.update_status(backup.id, crate::registry::NodeStatus::Active).await.unwrap();
        mock.set("http://primary", Canned::Fail("down".into()));
        mock.set(
            "http://backup",
            Canned::Search(SearchResponse {
                results: vec![],
                count: 0,
                duration_ms: 1,
            }),
        );

        let forwarder = Forwarder::new(
            registry,
            breakers,
            mock.clone() as Arc<dyn PeerClient>,
            auth,
            ForwarderConfig {
                max_retries: 0,
                backoff_base_ms: 1,
            },
        );
        let resp = forwarder
            .forward_search(
                &primary,
                SearchRequest {
                    query: "q".into(),
                    limit: 10,
                    options: Default::default(),
                },
                ForwardedContext::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(resp.payload.count, 0);
        assert_eq!(resp.node, "backup");
        assert_eq!(resp.failover_from.as_deref(), Some("primary"));
    }
}
