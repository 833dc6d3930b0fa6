//! Node Registry (C8) — the authoritative in-memory view of the fleet,
//! backed by an injected `NodeStore` for durability. Every other component
//! (balancer, router, forwarder, search) reads nodes through this type;
//! none of them touch `NodeStore` directly.

mod node;
mod store;

pub use node::{slugify, CollectionDescriptor, Node, NodeStatus, NodeType};
pub use store::{InMemoryNodeStore, NodeStore, PgNodeStore};

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthService;
use crate::breaker::BreakerRegistry;
use crate::cache::Cache;
use crate::discovery::Discovery;
use crate::error::FabricError;
use crate::http_client::PeerClient;
use crate::matcher;

/// Tunables for the registry's own caching/health bookkeeping, distinct
/// from the breaker's retry policy.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub active_nodes_cache_ttl: Duration,
    pub ping_failure_threshold: u32,
    pub freshness_window: chrono::Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            active_nodes_cache_ttl: Duration::from_secs(300),
            ping_failure_threshold: 5,
            freshness_window: chrono::Duration::minutes(5),
        }
    }
}

pub struct NewNode {
    pub name: String,
    pub slug: Option<String>,
    pub node_type: NodeType,
    pub base_url: String,
    pub weight: u32,
    pub description: Option<String>,
}

struct ActiveCache {
    at: Instant,
    nodes: Vec<Node>,
}

pub struct Registry {
    nodes: DashMap<Uuid, Node>,
    slug_index: DashMap<String, Uuid>,
    collection_cache: DashMap<String, Option<Uuid>>,
    active_cache: RwLock<Option<ActiveCache>>,
    store: Arc<dyn NodeStore>,
    peer_client: Arc<dyn PeerClient>,
    auth: Arc<AuthService>,
    breakers: Arc<BreakerRegistry>,
    config: RegistryConfig,
    /// Routing digest — invalidated whenever a peer's metadata or
    /// membership changes (spec §4.10). `None` in tests that don't wire one.
    discovery: Option<Arc<Discovery>>,
    /// Search-result cache — invalidated per-node on unregister/status
    /// change (spec §4.6 `invalidateNode`). `None` in tests that don't wire
    /// one.
    cache: Option<Arc<Cache>>,
}

impl Registry {
    /// Load all persisted nodes and build the in-memory indices. Called
    /// once at startup.
    pub async fn load(
        store: Arc<dyn NodeStore>,
        peer_client: Arc<dyn PeerClient>,
        auth: Arc<AuthService>,
        breakers: Arc<BreakerRegistry>,
        config: RegistryConfig,
        discovery: Option<Arc<Discovery>>,
        cache: Option<Arc<Cache>>,
    ) -> Result<Self, FabricError> {
        let registry = Self {
            nodes: DashMap::new(),
            slug_index: DashMap::new(),
            collection_cache: DashMap::new(),
            active_cache: RwLock::new(None),
            store,
            peer_client,
            auth,
            breakers,
            config,
            discovery,
            cache,
        };
        for node in registry.store.load_all().await? {
            registry.slug_index.insert(node.slug.clone(), node.id);
            registry.nodes.insert(node.id, node);
        }
        Ok(registry)
    }

    async fn invalidate_caches(&self) {
        self.collection_cache.clear();
        *self.active_cache.write().await = None;
    }

    /// Purge this node's cached search results and invalidate the routing
    /// digest — called whenever its membership or status changes.
    async fn invalidate_node_dependents(&self, id: Uuid) {
        if let Some(cache) = &self.cache {
            cache.invalidate_node(id).await;
        }
        if let Some(discovery) = &self.discovery {
            discovery.invalidate().await;
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Node> {
        self.nodes.get(&id).map(|n| n.clone())
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<Node> {
        let id = *self.slug_index.get(slug)?;
        self.get(id)
    }

    pub fn all(&self) -> Vec<Node> {
        self.nodes.iter().map(|n| n.clone()).collect()
    }

    /// Register a new peer. Fails `DuplicateSlug` if the (derived or given)
    /// slug is already taken. Pings the node once, best-effort, immediately
    /// after persisting so its metadata/health is fresh from the start.
    pub async fn register(&self, data: NewNode) -> Result<Node, FabricError> {
        let slug = data
            .slug
            .unwrap_or_else(|| slugify(&data.name))
            .to_lowercase();
        if self.slug_index.contains_key(&slug) {
            return Err(FabricError::DuplicateSlug(slug));
        }

        let node = Node {
            id: Uuid::new_v4(),
            slug: slug.clone(),
            name: data.name,
            node_type: data.node_type,
            version: "unknown".to_string(),
            base_url: data.base_url,
            api_key: None,
            refresh_token_hash: None,
            refresh_token_expires_at: None,
            capabilities: Default::default(),
            collections: Vec::new(),
            domains: Default::default(),
            data_types: Default::default(),
            keywords: Default::default(),
            workflows: Default::default(),
            autonomous_collectors: Default::default(),
            description: data.description,
            status: NodeStatus::Inactive,
            weight: data.weight.max(1),
            active_connections: 0,
            avg_response_time_ms: 0.0,
            ping_failures: 0,
            last_ping_at: None,
            success_count: 0,
            failure_count: 0,
        };
        node.validate()?;

        self.store.upsert(&node).await?;
        self.slug_index.insert(slug.clone(), node.id);
        self.nodes.insert(node.id, node.clone());
        self.invalidate_caches().await;
        info!(node_id = %node.id, slug = %slug, "node registered");

        let id = node.id;
        if let Err(e) = self.ping(id).await {
            warn!(node_id = %id, error = %e, "initial ping after registration failed");
        }
        Ok(self.get(id).unwrap_or(node))
    }

    pub async fn unregister(&self, id: Uuid) -> Result<(), FabricError> {
        let Some((_, node)) = self.nodes.remove(&id) else {
            return Err(FabricError::NodeNotFound(id.to_string()));
        };
        self.slug_index.remove(&node.slug);
        self.store.delete(id).await?;
        self.invalidate_caches().await;
        self.invalidate_node_dependents(id).await;
        info!(node_id = %id, "node unregistered");
        Ok(())
    }

    pub async fn update_status(&self, id: Uuid, status: NodeStatus) -> Result<(), FabricError> {
        let updated = {
            let mut entry = self
                .nodes
                .get_mut(&id)
                .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
            entry.status = status;
            entry.clone()
        };
        self.store.upsert(&updated).await?;
        self.invalidate_caches().await;
        self.invalidate_node_dependents(id).await;
        Ok(())
    }

    /// Revoke `id`'s refresh token (spec §4.2 `revokeRefreshToken`): clears
    /// the hash/expiry and persists.
    pub async fn revoke_refresh_token(&self, id: Uuid) -> Result<(), FabricError> {
        let node = self.get(id).ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
        let updated = self.auth.revoke_refresh_token(&node);
        self.store.upsert(&updated).await?;
        self.nodes.insert(id, updated);
        Ok(())
    }

    /// Nodes considered eligible for dispatch, served from a short-lived
    /// cache (spec §4.8) so a fan-out search doesn't recompute health on
    /// every one of its candidate lookups.
    pub async fn get_active_nodes(&self) -> Vec<Node> {
        {
            let guard = self.active_cache.read().await;
            if let Some(cache) = guard.as_ref() {
                if cache.at.elapsed() < self.config.active_nodes_cache_ttl {
                    return cache.nodes.clone();
                }
            }
        }
        let nodes: Vec<Node> = self
            .nodes
            .iter()
            .map(|n| n.clone())
            .filter(|n| {
                n.is_healthy(self.config.ping_failure_threshold, self.config.freshness_window)
            })
            .collect();
        let mut guard = self.active_cache.write().await;
        *guard = Some(ActiveCache {
            at: Instant::now(),
            nodes: nodes.clone(),
        });
        nodes
    }

    /// True iff `node` owns a collection matching `model_class`, by exact,
    /// basename, singular/plural, or alias agreement (spec §4.8).
    pub fn node_owns_collection(node: &Node, model_class: &str) -> bool {
        node.collections
            .iter()
            .any(|c| matcher::owns_collection(&c.name, &c.aliases, model_class))
    }

    /// Find the (first) active node owning `model_class`, caching the
    /// result — including negative lookups — per class name until the next
    /// mutation invalidates the registry's caches.
    pub async fn find_node_for_collection(&self, model_class: &str) -> Option<Node> {
        if let Some(cached) = self.collection_cache.get(model_class) {
            return match *cached {
                Some(id) => self.get(id),
                None => None,
            };
        }
        let active = self.get_active_nodes().await;
        let found = active
            .into_iter()
            .find(|n| Self::node_owns_collection(n, model_class));
        self.collection_cache
            .insert(model_class.to_string(), found.as_ref().map(|n| n.id));
        found
    }

    /// Ping one node: issue it a fresh token, call its health endpoint, and
    /// on success merge its advertised metadata into our record and mark it
    /// healthy; on failure increment `ping_failures` and notify the breaker.
    pub async fn ping(&self, id: Uuid) -> Result<bool, FabricError> {
        let node = self.get(id).ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
        let token = self.auth.generate_token(&node, Some(300))?;

        let started = Instant::now();
        let result = self.peer_client.health(&node.base_url, &token).await;
        let elapsed_ms = started.elapsed().as_millis() as f64;

        match result {
            Ok(health) => {
                let updated = {
                    let mut entry = self
                        .nodes
                        .get_mut(&id)
                        .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
                    entry.status = NodeStatus::Active;
                    entry.ping_failures = 0;
                    entry.last_ping_at = Some(chrono::Utc::now());
                    entry.version = health.version;
                    entry.capabilities = health.capabilities.into_iter().collect();
                    if let Some(domains) = health.domains {
                        entry.domains = domains.into_iter().collect();
                    }
                    if let Some(data_types) = health.data_types {
                        entry.data_types = data_types.into_iter().collect();
                    }
                    if let Some(keywords) = health.keywords {
                        entry.keywords = keywords.into_iter().collect();
                    }
                    if let Some(collections) = health.collections {
                        entry.collections =
                            collections.into_iter().map(CollectionDescriptor::new).collect();
                    }
                    if let Some(workflows) = health.workflows {
                        entry.workflows = workflows.into_iter().collect();
                    }
                    if let Some(collectors) = health.autonomous_collectors {
                        entry.autonomous_collectors = collectors.into_iter().collect();
                    }
                    if health.description.is_some() {
                        entry.description = health.description;
                    }
                    // Exponentially smoothed moving average, 30% weight on
                    // the newest sample.
                    entry.avg_response_time_ms = if entry.success_count == 0 {
                        elapsed_ms
                    } else {
                        entry.avg_response_time_ms * 0.7 + elapsed_ms * 0.3
                    };
                    entry.success_count += 1;
                    entry.clone()
                };
                if let Err(e) = self.store.upsert(&updated).await {
                    warn!(node_id = %id, error = %e, "failed to persist node after successful ping");
                }
                self.breakers.record_success(id);
                self.invalidate_caches().await;
                if let Some(discovery) = &self.discovery {
                    discovery.invalidate().await;
                }
                Ok(true)
            }
            Err(e) => {
                let updated = {
                    let mut entry = self
                        .nodes
                        .get_mut(&id)
                        .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
                    entry.ping_failures += 1;
                    entry.failure_count += 1;
                    if entry.ping_failures >= self.config.ping_failure_threshold {
                        entry.status = NodeStatus::Error;
                    }
                    entry.clone()
                };
                if let Err(persist_err) = self.store.upsert(&updated).await {
                    warn!(node_id = %id, error = %persist_err, "failed to persist node after failed ping");
                }
                if e.is_breaker_failure() {
                    self.breakers.record_failure(id);
                }
                self.invalidate_caches().await;
                warn!(node_id = %id, error = %e, "ping failed");
                Ok(false)
            }
        }
    }

    /// Ping every known node concurrently — the watchdog's heartbeat tick.
    /// Returns one `bool` per node that was still present when the tick
    /// started (`true` = healthy); a node that disappeared mid-tick is
    /// logged and omitted rather than counted as unhealthy.
    pub async fn ping_all(&self) -> Vec<bool> {
        let ids: Vec<Uuid> = self.nodes.iter().map(|n| n.id).collect();
        let futures = ids.into_iter().map(|id| self.ping(id));
        let mut healthy = Vec::new();
        for result in futures_util::future::join_all(futures).await {
            match result {
                Ok(ok) => healthy.push(ok),
                Err(e) => warn!(error = %e, "ping_all: node disappeared mid-tick"),
            }
        }
        healthy
    }

    pub fn inc_active_connections(&self, id: Uuid) {
        if let Some(mut n) = self.nodes.get_mut(&id) {
            n.active_connections += 1;
        }
    }

    pub fn dec_active_connections(&self, id: Uuid) {
        if let Some(mut n) = self.nodes.get_mut(&id) {
            n.active_connections = n.active_connections.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::config::{AuthConfig, BreakerConfig};
    use crate::http_client::mock::{Canned, MockPeerClient};
    use crate::wire::HealthResponse;

    fn registry_with(peer: Arc<MockPeerClient>) -> Registry {
        let store: Arc<dyn NodeStore> = Arc::new(InMemoryNodeStore::new());
        let auth = Arc::new(AuthService::new(AuthConfig {
            jwt_secret: "s3cret".into(),
            ..Default::default()
        }));
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        tokio::runtime::Handle::current()
            .block_on(Registry::load(
                store,
                peer as Arc<dyn PeerClient>,
                auth,
                breakers,
                RegistryConfig::default(),
                None,
                None,
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn register_rejects_duplicate_slug() {
        let registry = registry_with(Arc::new(MockPeerClient::new()));
        let new = |slug: &str| NewNode {
            name: "Invoicing".into(),
            slug: Some(slug.into()),
            node_type: NodeType::Child,
            base_url: "http://localhost:9001".into(),
            weight: 1,
            description: None,
        };
        registry.register(new("invoicing")).await.unwrap();
        let err = registry.register(new("invoicing")).await.unwrap_err();
        assert!(matches!(err, FabricError::DuplicateSlug(_)));
    }

    #[tokio::test]
    async fn ping_merges_metadata_and_marks_active() {
        let mock = Arc::new(MockPeerClient::new());
        let registry = registry_with(mock.clone());
        let node = registry
            .register(NewNode {
                name: "Invoicing".into(),
                slug: None,
                node_type: NodeType::Child,
                base_url: "http://child".into(),
                weight: 1,
                description: None,
            })
            .await
            .unwrap();

        mock.set(
            "http://child",
            Canned::Health(HealthResponse {
                status: "ok".into(),
                version: "2.1.0".into(),
                capabilities: vec!["search".into(), "chat".into()],
                description: None,
                domains: Some(vec!["finance".into()]),
                data_types: None,
                keywords: None,
                collections: Some(vec!["Invoice".into()]),
                workflows: None,
                autonomous_collectors: None,
            }),
        );

        let ok = registry.ping(node.id).await.unwrap();
        assert!(ok);
        let updated = registry.get(node.id).unwrap();
        assert_eq!(updated.status, NodeStatus::Active);
        assert_eq!(updated.version, "2.1.0");
        assert!(updated.capabilities.contains("chat"));
        assert_eq!(updated.collections[0].name, "Invoice");
    }

    #[tokio::test]
    async fn find_node_for_collection_matches_basename_and_caches() {
        let mock = Arc::new(MockPeerClient::new());
        let registry = registry_with(mock.clone());
        let node = registry
            .register(NewNode {
                name: "Invoicing".into(),
                slug: None,
                node_type: NodeType::Child,
                base_url: "http://child".into(),
                weight: 1,
                description: None,
            })
            .await
            .unwrap();
        mock.set(
            "http://child",
            Canned::Health(HealthResponse {
                status: "ok".into(),
                version: "1.0.0".into(),
                capabilities: vec![],
                description: None,
                domains: None,
                data_types: None,
                keywords: None,
                collections: Some(vec!["App\\Models\\Invoice".into()]),
                workflows: None,
                autonomous_collectors: None,
            }),
        );
        registry.ping(node.id).await.unwrap();

        let found = registry.find_node_for_collection("Invoice").await;
        assert_eq!(found.unwrap().id, node.id);

        let calls_before = mock.call_count();
        let found_again = registry.find_node_for_collection("Invoice").await;
        assert_eq!(found_again.unwrap().id, node.id);
        assert_eq!(mock.call_count(), calls_before); // served from cache, no extra peer call
    }

    #[tokio::test]
    async fn revoke_refresh_token_clears_and_persists() {
        let registry = registry_with(Arc::new(MockPeerClient::new()));
        let node = registry
            .register(NewNode {
                name: "Invoicing".into(),
                slug: None,
                node_type: NodeType::Child,
                base_url: "http://child".into(),
                weight: 1,
                description: None,
            })
            .await
            .unwrap();
        let issued = registry.auth.generate_refresh_token(None);
        registry.update_status(node.id, NodeStatus::Active).await.unwrap();
        {
            let mut entry = registry.nodes.get_mut(&node.id).unwrap();
            entry.refresh_token_hash = Some(issued.hash.clone());
            entry.refresh_token_expires_at = Some(issued.expires_at);
        }

        registry.revoke_refresh_token(node.id).await.unwrap();

        let updated = registry.get(node.id).unwrap();
        assert!(updated.refresh_token_hash.is_none());
        assert!(updated.refresh_token_expires_at.is_none());
        let persisted = registry.store.load_all().await.unwrap();
        let persisted_node = persisted.into_iter().find(|n| n.id == node.id).unwrap();
        assert!(persisted_node.refresh_token_hash.is_none());
    }

    #[tokio::test]
    async fn update_status_invalidates_cache_and_discovery() {
        use crate::cache::Cache;
        use crate::config::CacheConfig;
        use crate::discovery::{Discovery, LocalMetadata};

        let mock = Arc::new(MockPeerClient::new());
        let store: Arc<dyn NodeStore> = Arc::new(InMemoryNodeStore::new());
        let auth = Arc::new(AuthService::new(AuthConfig {
            jwt_secret: "s3cret".into(),
            ..Default::default()
        }));
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let cache = Arc::new(Cache::new(CacheConfig::default(), None));
        let discovery = Arc::new(Discovery::new(
            LocalMetadata::default(),
            None,
            crate::config::RouterConfig::default(),
        ));

        let registry = Registry::load(
            store,
            mock as Arc<dyn PeerClient>,
            auth,
            breakers,
            RegistryConfig::default(),
            Some(discovery.clone()),
            Some(cache.clone()),
        )
        .await
        .unwrap();

        let node = registry
            .register(NewNode {
                name: "Invoicing".into(),
                slug: None,
                node_type: NodeType::Child,
                base_url: "http://child".into(),
                weight: 1,
                description: None,
            })
            .await
            .unwrap();

        cache
            .put(
                "fp1",
                "invoice question",
                &[node.id],
                serde_json::json!({"ok": true}),
                1,
                5,
                None,
            )
            .await;
        assert_eq!(cache.len(), 1);

        registry.update_status(node.id, NodeStatus::Error).await.unwrap();

        assert_eq!(cache.len(), 0);
    }
}
