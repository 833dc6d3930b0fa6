//! Router (C11) — decides which single node should serve a `route`
//! request: collection ownership first, then AI-intent routing against the
//! fleet digest, then keyword-overlap scoring as a fallback that never
//! depends on an LLM being reachable.

use std::sync::Arc;

use tracing::warn;

use crate::config::RouterConfig;
use crate::discovery::Discovery;
use crate::llm::LlmClient;
use crate::matcher;
use crate::registry::{Node, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    CollectionOwnership,
    AiIntent,
    KeywordFallback,
    NoMatch,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub node: Option<Node>,
    pub reason: RouteReason,
    pub explanation: String,
}

pub struct Router {
    registry: Arc<Registry>,
    discovery: Arc<Discovery>,
    llm: Option<Arc<dyn LlmClient>>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        registry: Arc<Registry>,
        discovery: Arc<Discovery>,
        llm: Option<Arc<dyn LlmClient>>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            discovery,
            llm,
            config,
        }
    }

    /// Route `query`, optionally scoped to a known `collection` hint.
    /// Always re-verifies the chosen node is still active before returning
    /// it — metadata can go stale between digest compilation and dispatch.
    pub async fn route(&self, query: &str, collection: Option<&str>) -> RoutingDecision {
        if let Some(collection) = collection {
            if let Some(node) = self.registry.find_node_for_collection(collection).await {
                if self.still_active(&node).await {
                    return RoutingDecision {
                        node: Some(node.clone()),
                        reason: RouteReason::CollectionOwnership,
                        explanation: format!("node '{}' owns collection '{collection}'", node.slug),
                    };
                }
            }
        }

        if let Some(decision) = self.try_ai_intent(query).await {
            if self.still_active_opt(&decision.node).await {
                return decision;
            }
        }

        self.keyword_fallback(query).await
    }

    async fn still_active(&self, node: &Node) -> bool {
        self.registry
            .get_active_nodes()
            .await
            .iter()
            .any(|n| n.id == node.id)
    }

    async fn still_active_opt(&self, node: &Option<Node>) -> bool {
        match node {
            Some(n) => self.still_active(n).await,
            None => false,
        }
    }

    async fn try_ai_intent(&self, query: &str) -> Option<RoutingDecision> {
        let llm = self.llm.as_ref()?;
        let peers = self.registry.get_active_nodes().await;
        let digest = self.discovery.digest(&peers).await;
        let prompt = format!(
            "Given this fleet digest:\n{digest}\n\n\
             Route this query to exactly one node: \"{query}\"\n\
             Respond with exactly two lines:\n\
             NODE: <slug>\n\
             REASON: <one sentence>"
        );
        let completion = tokio::time::timeout(
            std::time::Duration::from_secs(self.config.llm_timeout_secs),
            llm.complete(&prompt, self.config.routing_model.as_deref()),
        )
        .await
        .ok()?
        .ok()?;

        let (slug, reason) = parse_ai_routing_response(&completion)?;
        let node = peers.into_iter().find(|n| n.slug == slug);
        if node.is_none() {
            warn!(slug = %slug, "AI routing named an unknown node slug");
        }
        Some(RoutingDecision {
            node,
            reason: RouteReason::AiIntent,
            explanation: reason,
        })
    }

    /// `collections*15 + keywords*10 + dataTypes*8 + domains*5`, the
    /// deterministic fallback that works with no LLM at all (spec §4.11).
    async fn keyword_fallback(&self, query: &str) -> RoutingDecision {
        let peers = self.registry.get_active_nodes().await;
        let mut best: Option<(Node, u32)> = None;
        for node in peers {
            let mut score = 0u32;
            for c in &node.collections {
                if matcher::contains(query, &c.name) || matcher::matches(&c.name, query) {
                    score += 15;
                }
            }
            for kw in &node.keywords {
                if matcher::contains(query, kw) {
                    score += 10;
                }
            }
            for dt in &node.data_types {
                if matcher::contains(query, dt) {
                    score += 8;
                }
            }
            for domain in &node.domains {
                if matcher::contains(query, domain) {
                    score += 5;
                }
            }
            let beats_current = match &best {
                Some((_, b)) => score > *b,
                None => true,
            };
            if score >= self.config.min_keyword_score && beats_current {
                best = Some((node, score));
            }
        }
        match best {
            Some((node, score)) => RoutingDecision {
                explanation: format!("keyword score {score} for node '{}'", node.slug),
                node: Some(node),
                reason: RouteReason::KeywordFallback,
            },
            None => RoutingDecision {
                node: None,
                reason: RouteReason::NoMatch,
                explanation: "no node met the minimum keyword score".to_string(),
            },
        }
    }

    pub fn llm(&self) -> Option<Arc<dyn LlmClient>> {
        self.llm.clone()
    }

    pub fn explain(&self, decision: &RoutingDecision) -> String {
        match &decision.node {
            Some(node) => format!(
                "routed to '{}' via {:?}: {}",
                node.slug, decision.reason, decision.explanation
            ),
            None => format!("no route found: {}", decision.explanation),
        }
    }
}

/// Strictly parses the two-line `NODE:`/`REASON:` contract the AI-intent
/// prompt demands; any deviation is treated as an unparseable response
/// rather than guessed at.
fn parse_ai_routing_response(text: &str) -> Option<(String, String)> {
    let mut node = None;
    let mut reason = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("NODE:") {
            node = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("REASON:") {
            reason = Some(rest.trim().to_string());
        }
    }
    Some((node?, reason.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_response() {
        let (node, reason) = parse_ai_routing_response("NODE: invoicing\nREASON: owns invoices\n").unwrap();
        assert_eq!(node, "invoicing");
        assert_eq!(reason, "owns invoices");
    }

    #[test]
    fn rejects_response_missing_node_line() {
        assert!(parse_ai_routing_response("REASON: no idea").is_none());
    }

    #[test]
    fn tolerates_extra_surrounding_text() {
        let (node, _) = parse_ai_routing_response(
            "Sure, here is my answer.\nNODE: billing\nREASON: keyword match\nThanks!",
        )
        .unwrap();
        assert_eq!(node, "billing");
    }
}
