//! Two-tier Cache (C6) — in-process L1 backed by an optional durable L2
//! (spec §4.6). Structured after `MultiTierBackend` from the `skp-cache`
//! example: L1 is tried first and failures there degrade to a miss rather
//! than propagating, L2 failures are swallowed the same way (availability
//! over strict consistency), and an L2 hit backfills L1.

mod fingerprint;

pub use fingerprint::fingerprint;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::FabricError;

/// L1 entry, shaped after spec §3's `CacheEntry` — carries enough of the
/// search that produced it (`query`, `node_id_set`) to support
/// node-scoped invalidation and statistics, not just the raw payload.
struct Entry {
    fingerprint: String,
    query: String,
    node_id_set: HashSet<Uuid>,
    value: Arc<serde_json::Value>,
    result_count: usize,
    duration_ms: u64,
    expires_at: Instant,
    hit_count: AtomicU64,
    created_at: Instant,
}

/// Durable L2 tier, injected so hosts without a shared store (single
/// instance, tests) can run with L1 only. Spec leaves the backing store
/// unspecified; `CacheBackend` is the seam a `sqlx`-backed implementation
/// would fill in.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, FabricError>;
    async fn put(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<(), FabricError>;
    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), FabricError>;
}

/// Two-tier result cache. L1 (`DashMap`) is always present; L2 is optional
/// and only consulted when `config.use_durable` is set.
pub struct Cache {
    l1: DashMap<String, Entry>,
    l2: Option<Arc<dyn CacheBackend>>,
    /// Single-flight guards per key, so a cache-stampede of identical
    /// concurrent misses produces one upstream computation, not N (spec §9
    /// open question — resolved as in-process single-flight, see DESIGN.md).
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    config: CacheConfig,
}

impl Cache {
    pub fn new(config: CacheConfig, l2: Option<Arc<dyn CacheBackend>>) -> Self {
        Self {
            l1: DashMap::new(),
            l2,
            in_flight: DashMap::new(),
            config,
        }
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}:{}", self.config.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        if !self.config.enabled {
            return None;
        }
        let full_key = self.prefixed(key);
        if let Some(entry) = self.l1.get(&full_key) {
            if entry.expires_at > Instant::now() {
                // Spec §4.6: a hit MUST increment hitCount.
                entry.hit_count.fetch_add(1, Ordering::Relaxed);
                return Some((*entry.value).clone());
            }
        }
        self.l1.remove(&full_key);

        if self.config.use_durable {
            if let Some(l2) = &self.l2 {
                match l2.get(&full_key).await {
                    Ok(Some(value)) => {
                        // L2 only stores the raw payload, not the full
                        // CacheEntry shape, so the backfilled entry carries
                        // no query/nodeIdSet — invalidate_node won't see it.
                        let now = Instant::now();
                        self.l1.insert(
                            full_key,
                            Entry {
                                fingerprint: key.to_string(),
                                query: String::new(),
                                node_id_set: HashSet::new(),
                                value: Arc::new(value.clone()),
                                result_count: 0,
                                duration_ms: 0,
                                expires_at: now + self.config.default_ttl(),
                                hit_count: AtomicU64::new(1),
                                created_at: now,
                            },
                        );
                        return Some(value);
                    }
                    Ok(None) => {}
                    Err(_) => {} // degrade to miss; availability over consistency
                }
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn put(
        &self,
        fingerprint: &str,
        query: &str,
        node_ids: &[Uuid],
        value: serde_json::Value,
        result_count: usize,
        duration_ms: u64,
        ttl: Option<Duration>,
    ) {
        if !self.config.enabled {
            return;
        }
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let full_key = self.prefixed(fingerprint);
        let now = Instant::now();
        self.l1.insert(
            full_key.clone(),
            Entry {
                fingerprint: fingerprint.to_string(),
                query: query.to_string(),
                node_id_set: node_ids.iter().copied().collect(),
                value: Arc::new(value.clone()),
                result_count,
                duration_ms,
                expires_at: now + ttl,
                hit_count: AtomicU64::new(0),
                created_at: now,
            },
        );
        if self.config.use_durable {
            if let Some(l2) = &self.l2 {
                let _ = l2.put(&full_key, &value, ttl).await; // best-effort
            }
        }
    }

    /// Run `compute` if and only if no other caller is currently computing
    /// the same key — stampede protection for expensive cache-miss paths
    /// like a federated search fan-out.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: &str,
        query: &str,
        node_ids: &[Uuid],
        ttl: Option<Duration>,
        compute: F,
    ) -> serde_json::Value
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = (serde_json::Value, usize, u64)>,
    {
        if let Some(hit) = self.get(fingerprint).await {
            return hit;
        }
        let lock = self
            .in_flight
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        // Re-check: another caller may have populated the entry while we
        // waited for the lock.
        if let Some(hit) = self.get(fingerprint).await {
            return hit;
        }
        let (value, result_count, duration_ms) = compute().await;
        self.put(fingerprint, query, node_ids, value.clone(), result_count, duration_ms, ttl)
            .await;
        value
    }

    /// Purge every entry whose `node_id_set` includes `node_id` (spec §4.6
    /// `invalidateNode`) — called when a node is deregistered or its status
    /// changes, so stale results attributed to it can't be served. L2 has
    /// no tag index to scan by membership, so its invalidation degrades to
    /// a best-effort prefix flush (spec §9: untagged durable stores fall
    /// back to a weaker invalidation than L1's precise membership filter).
    pub async fn invalidate_node(&self, node_id: Uuid) {
        self.l1.retain(|_, e| !e.node_id_set.contains(&node_id));
        if self.config.use_durable {
            if let Some(l2) = &self.l2 {
                let _ = l2.invalidate_prefix(&node_id.to_string()).await;
            }
        }
    }

    /// Sweep expired L1 entries — called periodically by the watchdog so
    /// memory doesn't grow unbounded between reads of stale keys.
    pub fn clean_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.l1.len();
        self.l1.retain(|_, e| e.expires_at > now);
        before - self.l1.len()
    }

    pub async fn flush_all(&self) {
        self.l1.clear();
    }

    pub fn len(&self) -> usize {
        self.l1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.l1.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = Cache::new(CacheConfig::default(), None);
        cache.put("a", "query", &[], json!({"x": 1}), 1, 5, None).await;
        assert_eq!(cache.get("a").await, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = Cache::new(CacheConfig::default(), None);
        cache
            .put("a", "query", &[], json!(1), 1, 5, Some(Duration::from_millis(1)))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("a").await, None);
    }

    #[tokio::test]
    async fn clean_expired_removes_only_stale_entries() {
        let cache = Cache::new(CacheConfig::default(), None);
        cache
            .put("fresh", "query", &[], json!(1), 1, 5, Some(Duration::from_secs(60)))
            .await;
        cache
            .put("stale", "query", &[], json!(1), 1, 5, Some(Duration::from_millis(1)))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = cache.clean_expired();
        assert_eq!(removed, 1);
        assert!(cache.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn disabled_cache_never_stores() {
        let cache = Cache::new(
            CacheConfig {
                enabled: false,
                ..Default::default()
            },
            None,
        );
        cache.put("a", "query", &[], json!(1), 1, 5, None).await;
        assert_eq!(cache.get("a").await, None);
    }

    #[tokio::test]
    async fn get_or_compute_only_runs_compute_once_per_key() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let cache = Cache::new(CacheConfig::default(), None);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let first = cache
            .get_or_compute("k", "query", &[], None, || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                (json!("computed"), 1, 5)
            })
            .await;
        let calls3 = calls.clone();
        let second = cache
            .get_or_compute("k", "query", &[], None, || async move {
                calls3.fetch_add(1, Ordering::SeqCst);
                (json!("computed-again"), 1, 5)
            })
            .await;
        assert_eq!(first, json!("computed"));
        assert_eq!(second, json!("computed"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_node_purges_only_entries_tagged_with_it() {
        let cache = Cache::new(CacheConfig::default(), None);
        let node_a = Uuid::new_v4();
        let node_b = Uuid::new_v4();
        cache
            .put("a", "query a", &[node_a], json!(1), 1, 5, None)
            .await;
        cache
            .put("b", "query b", &[node_b], json!(2), 1, 5, None)
            .await;

        cache.invalidate_node(node_a).await;

        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn hit_increments_hit_count() {
        let cache = Cache::new(CacheConfig::default(), None);
        cache.put("a", "query", &[], json!(1), 1, 5, None).await;
        let full_key = cache.prefixed("a");
        cache.get("a").await;
        cache.get("a").await;
        assert_eq!(
            cache.l1.get(&full_key).unwrap().hit_count.load(Ordering::Relaxed),
            2
        );
    }
}
