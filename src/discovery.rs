//! Metadata Discovery & Digest (C10). The master's own local metadata is
//! supplied explicitly by the host at construction time (spec §9: "runtime
//! class discovery" was rejected in favor of explicit registration — no
//! reflection, no filesystem scanning). This module's job is compiling that
//! plus the fleet's advertised metadata into a "digest": a compact summary
//! used as routing context, cached with a TTL the way `ModelCache` caches
//! provider model lists in the backend's `model_registry.rs`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::config::{DigestMode, RouterConfig};
use crate::llm::LlmClient;
use crate::registry::{CollectionDescriptor, Node};

/// Metadata the master advertises about itself, supplied by the host —
/// never discovered by reflection or scanning.
#[derive(Debug, Clone, Default)]
pub struct LocalMetadata {
    pub capabilities: Vec<String>,
    pub collections: Vec<CollectionDescriptor>,
    pub domains: Vec<String>,
    pub data_types: Vec<String>,
    pub keywords: Vec<String>,
}

struct DigestCache {
    at: Instant,
    text: String,
}

pub struct Discovery {
    local: LocalMetadata,
    llm: Option<Arc<dyn LlmClient>>,
    config: RouterConfig,
    cache: RwLock<Option<DigestCache>>,
}

impl Discovery {
    pub fn new(local: LocalMetadata, llm: Option<Arc<dyn LlmClient>>, config: RouterConfig) -> Self {
        Self {
            local,
            llm,
            config,
            cache: RwLock::new(None),
        }
    }

    pub fn local_metadata(&self) -> &LocalMetadata {
        &self.local
    }

    /// Compiled digest of the master's own metadata plus every active
    /// child's, cached for `digest_cache_ttl_minutes`.
    pub async fn digest(&self, peers: &[Node]) -> String {
        {
            let guard = self.cache.read().await;
            if let Some(cache) = guard.as_ref() {
                if cache.at.elapsed() < Duration::from_secs(self.config.digest_cache_ttl_minutes * 60)
                {
                    return cache.text.clone();
                }
            }
        }
        let text = self.compile(peers).await;
        let mut guard = self.cache.write().await;
        *guard = Some(DigestCache {
            at: Instant::now(),
            text: text.clone(),
        });
        text
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn compile(&self, peers: &[Node]) -> String {
        let template = self.template_digest(peers);
        match self.config.digest_mode {
            DigestMode::Template => template,
            DigestMode::Ai => {
                let Some(llm) = &self.llm else {
                    return template; // no LLM configured, fall back silently
                };
                let prompt = format!(
                    "Summarize the following fleet of nodes into a compact routing \
                     digest. Keep node names and their distinguishing collections, \
                     domains, and keywords; drop anything redundant.\n\n{template}"
                );
                match tokio::time::timeout(
                    Duration::from_secs(self.config.llm_timeout_secs),
                    llm.complete(&prompt, self.config.routing_model.as_deref()),
                )
                .await
                {
                    Ok(Ok(summary)) => summary,
                    _ => template, // LLM unavailable or timed out: degrade to template
                }
            }
        }
    }

    fn template_digest(&self, peers: &[Node]) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "master: capabilities=[{}] collections=[{}] domains=[{}] keywords=[{}]",
            self.local.capabilities.join(","),
            self.local
                .collections
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
            self.local.domains.join(","),
            self.local.keywords.join(","),
        ));
        for node in peers {
            lines.push(format!(
                "{} ({}): capabilities=[{}] collections=[{}] domains=[{}] keywords=[{}]",
                node.slug,
                node.id,
                node.capabilities
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(","),
                node.collections
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                node.domains.iter().cloned().collect::<Vec<_>>().join(","),
                node.keywords.iter().cloned().collect::<Vec<_>>().join(","),
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubLlmClient;
    use crate::registry::NodeType;

    #[tokio::test]
    async fn template_digest_lists_master_and_peers() {
        let discovery = Discovery::new(
            LocalMetadata {
                capabilities: vec!["search".into()],
                ..Default::default()
            },
            None,
            RouterConfig::default(),
        );
        let peer = Node::new_for_test("invoicing", "http://child", NodeType::Child);
        let digest = discovery.digest(&[peer]).await;
        assert!(digest.contains("master:"));
        assert!(digest.contains("invoicing"));
    }

    #[tokio::test]
    async fn ai_mode_falls_back_to_template_on_llm_failure() {
        let discovery = Discovery::new(
            LocalMetadata::default(),
            Some(Arc::new(StubLlmClient {
                response: Err("unavailable".into()),
            })),
            RouterConfig {
                digest_mode: DigestMode::Ai,
                ..Default::default()
            },
        );
        let digest = discovery.digest(&[]).await;
        assert!(digest.contains("master:"));
    }

    #[tokio::test]
    async fn digest_is_cached_until_ttl_expires() {
        let discovery = Discovery::new(
            LocalMetadata::default(),
            None,
            RouterConfig {
                digest_cache_ttl_minutes: 60,
                ..Default::default()
            },
        );
        let first = discovery.digest(&[]).await;
        let peer = Node::new_for_test("new-node", "http://child", NodeType::Child);
        let second = discovery.digest(&[peer]).await;
        assert_eq!(first, second); // served from cache, new peer not reflected yet

        discovery.invalidate().await;
        let peer2 = Node::new_for_test("new-node", "http://child", NodeType::Child);
        let third = discovery.digest(&[peer2]).await;
        assert!(third.contains("new-node"));
    }
}
