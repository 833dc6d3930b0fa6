//! Federated Search (C12) — the cross-node fan-out/merge pipeline. Ties
//! together the cache, registry, breaker, balancer, merger, and the local
//! vector engine into the one operation the rest of the system exists to
//! support.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthService;
use crate::balancer::LoadBalancer;
use crate::breaker::BreakerRegistry;
use crate::cache::{fingerprint, Cache};
use crate::config::SearchConfig;
use crate::http_client::{ForwardedContext, PeerClient};
use crate::merger::{Merger, NodeResults};
use crate::registry::{Node, Registry};
use crate::vector::VectorSearchEngine;
use crate::wire::{SearchOptions, SearchRequest, WireSearchResult};

pub struct SearchOutcome {
    pub results: Vec<WireSearchResult>,
    pub count: usize,
    pub duration_ms: u64,
    pub cached: bool,
    /// True if the deadline elapsed before every dispatched peer answered,
    /// or if one or more peers were skipped due to an open breaker.
    pub partial: bool,
    pub nodes_queried: usize,
    /// Per-node result counts in the final, post-merge result set (spec
    /// §4.12 `nodeBreakdown`); `Uuid::nil()` keys this node's own local
    /// contribution.
    pub node_breakdown: BTreeMap<Uuid, usize>,
    /// Per-`model_class` result counts in the final result set (spec §4.12
    /// `typeBreakdown`).
    pub type_breakdown: BTreeMap<String, usize>,
    pub avg_score: f64,
    /// True when the fan-out failed entirely and this is a local-only
    /// fallback payload (spec §4.12 step 7).
    pub fallback: bool,
}

pub struct SearchService {
    registry: Arc<Registry>,
    breakers: Arc<BreakerRegistry>,
    balancer: Arc<LoadBalancer>,
    cache: Arc<Cache>,
    merger: Arc<Merger>,
    peer_client: Arc<dyn PeerClient>,
    auth: Arc<AuthService>,
    vector: Option<Arc<dyn VectorSearchEngine>>,
    config: SearchConfig,
    per_peer_timeout: Duration,
}

impl SearchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<Registry>,
        breakers: Arc<BreakerRegistry>,
        balancer: Arc<LoadBalancer>,
        cache: Arc<Cache>,
        merger: Arc<Merger>,
        peer_client: Arc<dyn PeerClient>,
        auth: Arc<AuthService>,
        vector: Option<Arc<dyn VectorSearchEngine>>,
        config: SearchConfig,
        per_peer_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            breakers,
            balancer,
            cache,
            merger,
            peer_client,
            auth,
            vector,
            config,
            per_peer_timeout,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        options: SearchOptions,
        ctx: ForwardedContext,
    ) -> SearchOutcome {
        let started = Instant::now();

        let candidates = self.resolve_candidates(&options).await;
        let candidate_ids: Vec<Uuid> = candidates.iter().map(|n| n.id).collect();
        let options_json = serde_json::to_value(&options).unwrap_or(serde_json::Value::Null);
        let key = fingerprint(query, &candidate_ids, &options_json);

        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(outcome) = serde_json::from_value::<CachedOutcome>(cached) {
                return SearchOutcome {
                    results: outcome.results,
                    count: outcome.count,
                    duration_ms: started.elapsed().as_millis() as u64,
                    cached: true,
                    partial: outcome.partial,
                    nodes_queried: outcome.nodes_queried,
                    node_breakdown: outcome.node_breakdown,
                    type_breakdown: outcome.type_breakdown,
                    avg_score: outcome.avg_score,
                    fallback: outcome.fallback,
                };
            }
        }

        let selected = self.balancer.select_nodes(query, &candidates);
        let eligible: Vec<Node> = selected
            .into_iter()
            .filter(|n| !self.breakers.is_open(n.id))
            .collect();
        let skipped_for_open_breaker = candidates.len() > eligible.len();

        let outcome = match self
            .fan_out(query, limit, &options, &ctx, &eligible, skipped_for_open_breaker)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "federated search fan-out failed; falling back to local-only");
                self.local_only(query, limit, &options).await
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        self.cache
            .put(
                &key,
                query,
                &candidate_ids,
                serde_json::to_value(CachedOutcome {
                    results: outcome.results.clone(),
                    count: outcome.count,
                    partial: outcome.partial,
                    nodes_queried: outcome.nodes_queried,
                    node_breakdown: outcome.node_breakdown.clone(),
                    type_breakdown: outcome.type_breakdown.clone(),
                    avg_score: outcome.avg_score,
                    fallback: outcome.fallback,
                })
                .unwrap_or(serde_json::Value::Null),
                outcome.count,
                duration_ms,
                None,
            )
            .await;

        SearchOutcome {
            duration_ms,
            cached: false,
            ..outcome
        }
    }

    async fn resolve_candidates(&self, options: &SearchOptions) -> Vec<Node> {
        let active = self.registry.get_active_nodes().await;
        match &options.collections {
            Some(collections) if !collections.is_empty() => active
                .into_iter()
                .filter(|n| {
                    collections
                        .iter()
                        .any(|c| Registry::node_owns_collection(n, c))
                })
                .collect(),
            _ => active,
        }
    }

    async fn local_only(&self, query: &str, limit: usize, options: &SearchOptions) -> SearchOutcome {
        let local_results = self.local_search(query, limit, options).await;
        let count = local_results.len();

        let mut type_breakdown: BTreeMap<String, usize> = BTreeMap::new();
        let mut sum = 0.0;
        for r in &local_results {
            let key = r.model_class.clone().unwrap_or_else(|| "unknown".to_string());
            *type_breakdown.entry(key).or_insert(0) += 1;
            sum += r.score;
        }
        let mut node_breakdown = BTreeMap::new();
        if count > 0 {
            node_breakdown.insert(Uuid::nil(), count);
        }
        let avg_score = if count == 0 { 0.0 } else { sum / count as f64 };

        SearchOutcome {
            results: local_results,
            count,
            duration_ms: 0,
            cached: false,
            partial: true,
            nodes_queried: 0,
            node_breakdown,
            type_breakdown,
            avg_score,
            fallback: true,
        }
    }

    async fn local_search(&self, query: &str, limit: usize, options: &SearchOptions) -> Vec<WireSearchResult> {
        match &self.vector {
            Some(engine) => engine.search(query, limit, options).await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// This node's own corpus only, no fan-out — what this node answers
    /// with when it is itself on the receiving end of `/api/ai-engine/search`.
    pub async fn serve_inbound_search(
        &self,
        query: &str,
        limit: usize,
        options: &SearchOptions,
    ) -> Vec<WireSearchResult> {
        self.local_search(query, limit, options).await
    }

    async fn fan_out(
        &self,
        query: &str,
        limit: usize,
        options: &SearchOptions,
        ctx: &ForwardedContext,
        nodes: &[Node],
        already_partial: bool,
    ) -> Result<SearchOutcome, crate::error::FabricError> {
        let dispatch_nodes = nodes;
        let deadline = self.per_peer_timeout + Duration::from_millis(self.config.deadline_grace_ms);

        let mut in_flight: FuturesUnordered<_> = dispatch_nodes
            .iter()
            .cloned()
            .map(|node| {
                let peer_client = self.peer_client.clone();
                let auth = self.auth.clone();
                let breakers = self.breakers.clone();
                let req = SearchRequest {
                    query: query.to_string(),
                    limit,
                    options: options.clone(),
                };
                let ctx = ctx.clone();
                let registry = self.registry.clone();
                let per_peer_timeout = self.per_peer_timeout;
                async move {
                    registry.inc_active_connections(node.id);
                    let outcome = tokio::time::timeout(per_peer_timeout, async {
                        let token = auth.generate_token(&node, None)?;
                        peer_client.search(&node.base_url, &token, &req, &ctx).await
                    })
                    .await;
                    registry.dec_active_connections(node.id);

                    match outcome {
                        Ok(Ok(resp)) => {
                            breakers.record_success(node.id);
                            Some((node, resp.results))
                        }
                        Ok(Err(e)) => {
                            if e.is_breaker_failure() {
                                breakers.record_failure(node.id);
                            }
                            warn!(node_id = %node.id, error = %e, "peer search failed");
                            None
                        }
                        Err(_) => {
                            breakers.record_failure(node.id);
                            warn!(node_id = %node.id, "peer search timed out");
                            None
                        }
                    }
                }
            })
            .collect();

        let local_future = self.local_search(query, limit, options);
        tokio::pin!(local_future);

        let mut per_node = Vec::new();
        let mut partial = already_partial;
        let mut local_results: Option<Vec<WireSearchResult>> = None;

        let overall = tokio::time::sleep(deadline);
        tokio::pin!(overall);

        loop {
            tokio::select! {
                biased;
                _ = &mut overall => {
                    partial = true;
                    break;
                }
                local = &mut local_future, if local_results.is_none() => {
                    local_results = Some(local);
                }
                next = in_flight.next() => {
                    match next {
                        Some(Some((node, results))) => {
                            per_node.push(NodeResults {
                                node_id: node.id,
                                node_priority: 0,
                                results,
                            });
                        }
                        Some(None) => partial = true,
                        None => {
                            if local_results.is_some() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        if let Some(local) = local_results.or(Some(Vec::new())) {
            if !local.is_empty() {
                per_node.push(NodeResults {
                    node_id: Uuid::nil(),
                    node_priority: 0,
                    results: local,
                });
            }
        }

        let nodes_queried = dispatch_nodes.len();
        let (merged, stats) = self.merger.merge(limit, per_node);
        let results: Vec<WireSearchResult> = merged.into_iter().map(|m| m.result).collect();
        let count = results.len();
        Ok(SearchOutcome {
            results,
            count,
            duration_ms: 0,
            cached: false,
            partial,
            nodes_queried,
            node_breakdown: stats.by_node,
            type_breakdown: stats.by_type,
            avg_score: stats.avg_score,
            fallback: false,
        })
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedOutcome {
    results: Vec<WireSearchResult>,
    count: usize,
    partial: bool,
    nodes_queried: usize,
    node_breakdown: BTreeMap<Uuid, usize>,
    type_breakdown: BTreeMap<String, usize>,
    avg_score: f64,
    fallback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::config::{AuthConfig, BalancerConfig, BreakerConfig, CacheConfig, MergerConfig};
    use crate::http_client::mock::{Canned, MockPeerClient};
    use crate::registry::{InMemoryNodeStore, NewNode, NodeStore, NodeType, RegistryConfig};

    async fn build() -> (Arc<Registry>, Arc<MockPeerClient>, SearchService) {
        let mock = Arc::new(MockPeerClient::new());
        let store: Arc<dyn NodeStore> = Arc::new(InMemoryNodeStore::new());
        let auth = Arc::new(AuthService::new(AuthConfig {
            jwt_secret: "s3cret".into(),
            ..Default::default()
        }));
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let cache = Arc::new(Cache::new(CacheConfig::default(), None));
        let registry = Arc::new(
            Registry::load(
                store,
                mock.clone() as Arc<dyn PeerClient>,
                auth.clone(),
                breakers.clone(),
                RegistryConfig::default(),
                None,
                Some(cache.clone()),
            )
            .await
            .unwrap(),
        );
        let balancer = Arc::new(LoadBalancer::new(BalancerConfig::default()));
        let merger = Arc::new(Merger::new(MergerConfig::default()));
        let search = SearchService::new(
            registry.clone(),
            breakers,
            balancer,
            cache,
            merger,
            mock.clone() as Arc<dyn PeerClient>,
            auth,
            None,
            SearchConfig::default(),
            Duration::from_millis(500),
        );
        (registry, mock, search)
    }

    #[tokio::test]
    async fn merges_results_from_one_healthy_peer() {
        let (registry, mock, search) = build().await;
        let node = registry
            .register(NewNode {
                name: "Child".into(),
                slug: None,
                node_type: NodeType::Child,
                base_url: "http://child".into(),
                weight: 1,
                description: None,
            })
            .await
            .unwrap();
        registry
            .update_status(node.id, crate::registry::NodeStatus::Active)
            .await
            .unwrap();
        mock.set(
            "http://child",
            Canned::Search(crate::wire::SearchResponse {
                results: vec![WireSearchResult {
                    id: "1".into(),
                    content: "hello".into(),
                    score: 0.9,
                    model_class: Some("Invoice".into()),
                    model_type: None,
                    metadata: serde_json::json!({}),
                    title: None,
                    name: None,
                    body: None,
                }],
                count: 1,
                duration_ms: 5,
            }),
        );

        let outcome = search
            .search("hello", 10, SearchOptions::default(), ForwardedContext::default())
            .await;
        assert_eq!(outcome.count, 1);
        assert!(!outcome.cached);
    }

    #[tokio::test]
    async fn second_identical_search_is_served_from_cache() {
        let (registry, mock, search) = build().await;
        let node = registry
            .register(NewNode {
                name: "Child".into(),
                slug: None,
                node_type: NodeType::Child,
                base_url: "http://child".into(),
                weight: 1,
                description: None,
            })
            .await
            .unwrap();
        registry
            .update_status(node.id, crate::registry::NodeStatus::Active)
            .await
            .unwrap();
        mock.set(
            "http://child",
            Canned::Search(crate::wire::SearchResponse {
                results: vec![],
                count: 0,
                duration_ms: 1,
            }),
        );
        let _ = search
            .search("hello", 10, SearchOptions::default(), ForwardedContext::default())
            .await;
        let calls_before = mock.call_count();
        let second = search
            .search("hello", 10, SearchOptions::default(), ForwardedContext::default())
            .await;
        assert!(second.cached);
        assert_eq!(mock.call_count(), calls_before);
    }

    #[tokio::test]
    async fn slow_peer_past_deadline_yields_partial_result() {
        let (registry, mock, search) = build().await;
        let node = registry
            .register(NewNode {
                name: "Slow".into(),
                slug: None,
                node_type: NodeType::Child,
                base_url: "http://slow".into(),
                weight: 1,
                description: None,
            })
            .await
            .unwrap();
        registry
            .update_status(node.id, crate::registry::NodeStatus::Active)
            .await
            .unwrap();
        mock.set_with_delay(
            "http://slow",
            Canned::Search(crate::wire::SearchResponse {
                results: vec![],
                count: 0,
                duration_ms: 1,
            }),
            Duration::from_secs(5),
        );
        let outcome = search
            .search("hello", 10, SearchOptions::default(), ForwardedContext::default())
            .await;
        assert!(outcome.partial);
    }
}
