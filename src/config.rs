//! Jaskier Shared Pattern — config
//! Typed configuration surface (spec §6, §9). Every subsystem's "options"
//! bag is an explicit struct with a `Default` impl rather than a loosely
//! typed map; unknown keys are rejected at the deserialization boundary
//! (`deny_unknown_fields`) so a typo in a config file fails loudly instead
//! of silently falling back to a default.
//!
//! The core never reads environment variables or files itself — `main.rs`
//! (the host binary) is the only place that touches `std::env`, consistent
//! with treating configuration loading as an external concern.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TransportConfig {
    pub request_timeout_secs: u64,
    pub verify_ssl: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            verify_ssl: true,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub retry_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            retry_timeout_secs: 30,
            timeout_secs: 60,
        }
    }
}

impl BreakerConfig {
    pub fn retry_timeout(&self) -> Duration {
        secs(self.retry_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuthConfig {
    /// Shared HS256 signing secret. Required for token issuance —
    /// `AuthService::generate_token` fails with `NoSignerConfigured` if empty.
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub issuer: String,
    pub audience: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_ttl_secs: 3600,
            refresh_ttl_secs: 86_400,
            issuer: "node-fabric".to_string(),
            audience: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub use_durable: bool,
    pub use_tags: bool,
    pub flush_all_on_invalidate: bool,
    pub prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 900,
            use_durable: false,
            use_tags: false,
            flush_all_on_invalidate: false,
            prefix: "fed".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerStrategy {
    RoundRobin,
    LeastConnections,
    Weighted,
    ResponseTime,
    Random,
}

impl Default for BalancerStrategy {
    fn default() -> Self {
        BalancerStrategy::ResponseTime
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BalancerConfig {
    pub strategy: BalancerStrategy,
    pub max_nodes: Option<usize>,
    /// Weight of `active_connections` in the `response_time` composite score.
    pub alpha: f64,
    /// Weight of `avg_response_time` in the composite score.
    pub beta: f64,
    /// Weight of `(1 - success_rate)` in the composite score.
    pub gamma: f64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: BalancerStrategy::ResponseTime,
            max_nodes: None,
            alpha: 1.0,
            beta: 0.01,
            gamma: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Score,
    RoundRobin,
    NodePriority,
    Diversity,
    Hybrid,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Score
    }
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Score => "score",
            MergeStrategy::RoundRobin => "round_robin",
            MergeStrategy::NodePriority => "node_priority",
            MergeStrategy::Diversity => "diversity",
            MergeStrategy::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MergerConfig {
    pub strategy: MergeStrategy,
    pub deduplication: bool,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::Score,
            deduplication: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestMode {
    Template,
    Ai,
}

impl Default for DigestMode {
    fn default() -> Self {
        DigestMode::Template
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RouterConfig {
    pub min_keyword_score: u32,
    pub digest_mode: DigestMode,
    pub digest_cache_ttl_minutes: u64,
    pub routing_model: Option<String>,
    pub llm_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_keyword_score: 10,
            digest_mode: DigestMode::Template,
            digest_cache_ttl_minutes: 60,
            routing_model: None,
            llm_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DiscoveryConfig {
    pub local_metadata_cache_ttl_minutes: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            local_metadata_cache_ttl_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ForwarderConfig {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_base_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SearchConfig {
    /// Grace period added on top of the slowest configured per-peer timeout
    /// to form the overall search deadline (spec §5).
    pub deadline_grace_ms: u64,
    pub active_nodes_cache_ttl_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            deadline_grace_ms: 500,
            active_nodes_cache_ttl_secs: 300,
        }
    }
}

/// Aggregate configuration for the whole fabric core. Constructed by the
/// host (`main.rs`) from its own environment/config source and handed down
/// as plain data — the core never parses env vars itself.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct FabricConfig {
    pub transport: TransportConfig,
    pub breaker: BreakerConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub balancer: BalancerConfig,
    pub merger: MergerConfig,
    pub router: RouterConfig,
    pub discovery: DiscoveryConfig,
    pub forwarder: ForwarderConfig,
    pub search: SearchConfig,
}
