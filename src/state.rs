//! Central application state — the fabric's own components, wired together
//! from `FabricConfig` and the host-supplied external collaborators.
//! Clone-friendly: every field is an `Arc` (or `Clone`-cheap), following
//! the same shape as the backend's own `AppState`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::AuthService;
use crate::balancer::LoadBalancer;
use crate::breaker::BreakerRegistry;
use crate::cache::{Cache, CacheBackend};
use crate::config::FabricConfig;
use crate::discovery::{Discovery, LocalMetadata};
use crate::error::FabricError;
use crate::forwarder::Forwarder;
use crate::http_client::{HttpPeerClient, PeerClient};
use crate::llm::LlmClient;
use crate::merger::Merger;
use crate::registry::{NodeStore, Registry, RegistryConfig};
use crate::router::Router;
use crate::search::SearchService;
use crate::vector::VectorSearchEngine;

/// Host-supplied collaborators the core treats as external: persistence,
/// an LLM, a local vector engine, an optional durable cache tier, and this
/// master's own advertised metadata.
pub struct FabricDeps {
    pub node_store: Arc<dyn NodeStore>,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub vector: Option<Arc<dyn VectorSearchEngine>>,
    pub cache_backend: Option<Arc<dyn CacheBackend>>,
    pub local_metadata: LocalMetadata,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FabricConfig>,
    pub registry: Arc<Registry>,
    pub breakers: Arc<BreakerRegistry>,
    pub balancer: Arc<LoadBalancer>,
    pub cache: Arc<Cache>,
    pub merger: Arc<Merger>,
    pub auth: Arc<AuthService>,
    pub forwarder: Arc<Forwarder>,
    pub discovery: Arc<Discovery>,
    pub router: Arc<Router>,
    pub search: Arc<SearchService>,
    pub peer_client: Arc<dyn PeerClient>,
    pub start_time: Instant,
    /// `true` once the initial registry load and node pings complete.
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    pub async fn new(config: FabricConfig, deps: FabricDeps) -> Result<Self, FabricError> {
        let config = Arc::new(config);
        let peer_client: Arc<dyn PeerClient> = Arc::new(HttpPeerClient::new(&config.transport)?);
        let auth = Arc::new(AuthService::new(config.auth.clone()));
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));

        // Cache and Discovery have no dependency on Registry, so both are
        // built first and handed to it — it invalidates both whenever a
        // node's membership, status, or metadata changes.
        let cache = Arc::new(Cache::new(config.cache.clone(), deps.cache_backend));
        let discovery = Arc::new(Discovery::new(deps.local_metadata, deps.llm.clone(), config.router.clone()));

        let registry_config = RegistryConfig {
            active_nodes_cache_ttl: std::time::Duration::from_secs(
                config.search.active_nodes_cache_ttl_secs,
            ),
            ..RegistryConfig::default()
        };
        let registry = Arc::new(
            Registry::load(
                deps.node_store,
                peer_client.clone(),
                auth.clone(),
                breakers.clone(),
                registry_config,
                Some(discovery.clone()),
                Some(cache.clone()),
            )
            .await?,
        );

        let balancer = Arc::new(LoadBalancer::new(config.balancer.clone()));
        let merger = Arc::new(Merger::new(config.merger.clone()));
        let router = Arc::new(Router::new(
            registry.clone(),
            discovery.clone(),
            deps.llm,
            config.router.clone(),
        ));
        let forwarder = Arc::new(Forwarder::new(
            registry.clone(),
            breakers.clone(),
            peer_client.clone(),
            auth.clone(),
            config.forwarder.clone(),
        ));
        let search = Arc::new(SearchService::new(
            registry.clone(),
            breakers.clone(),
            balancer.clone(),
            cache.clone(),
            merger.clone(),
            peer_client.clone(),
            auth.clone(),
            deps.vector,
            config.search.clone(),
            config.transport.request_timeout(),
        ));

        Ok(Self {
            config,
            registry,
            breakers,
            balancer,
            cache,
            merger,
            auth,
            forwarder,
            discovery,
            router,
            search,
            peer_client,
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
        tracing::info!("fabric marked as READY");
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl AppState {
    /// Build a router-ready state with no real database or LLM — used by
    /// integration tests that only need to drive HTTP routing, not
    /// persistence.
    pub async fn new_test() -> Self {
        use crate::registry::InMemoryNodeStore;

        let mut config = FabricConfig::default();
        config.auth.jwt_secret = "test-secret".to_string();

        let deps = FabricDeps {
            node_store: Arc::new(InMemoryNodeStore::new()),
            llm: None,
            vector: None,
            cache_backend: None,
            local_metadata: crate::discovery::LocalMetadata::default(),
        };
        Self::new(config, deps)
            .await
            .expect("test state construction must not fail")
    }
}
