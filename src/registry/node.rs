//! Node (spec §3) — persistent record of a peer in the fleet.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Master,
    Child,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Master => "master",
            NodeType::Child => "child",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Inactive,
    Error,
}

/// A named, searchable corpus owned by exactly one node at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CollectionDescriptor {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CollectionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            display_name: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Node {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub node_type: NodeType,
    pub version: String,

    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,

    pub capabilities: BTreeSet<String>,
    pub collections: Vec<CollectionDescriptor>,
    pub domains: BTreeSet<String>,
    pub data_types: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub workflows: BTreeSet<String>,
    pub autonomous_collectors: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: NodeStatus,
    pub weight: u32,
    pub active_connections: u32,
    pub avg_response_time_ms: f64,
    pub ping_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
}

/// Slugify a display name into a unique, URL-safe identifier — lower-cased,
/// non-alphanumerics collapsed to single hyphens, no leading/trailing hyphen.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_hyphen = true; // suppresses a leading hyphen
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            out.push('-');
            last_was_hyphen = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

impl Node {
    /// `weight >= 1`, `active_connections >= 0` (guaranteed by type),
    /// `base_url` parseable — the three persistent invariants of spec §3.
    pub fn validate(&self) -> Result<(), crate::error::FabricError> {
        if self.weight == 0 {
            return Err(crate::error::FabricError::AuthFailure(
                "node weight must be >= 1".into(),
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| crate::error::FabricError::AuthFailure(format!("invalid base_url: {e}")))?;
        Ok(())
    }

    /// "a node is healthy iff status=active ∧ pingFailures < threshold ∧
    /// lastPingAt within freshness window" (spec §3).
    pub fn is_healthy(&self, failure_threshold: u32, freshness: chrono::Duration) -> bool {
        if self.status != NodeStatus::Active || self.ping_failures >= failure_threshold {
            return false;
        }
        match self.last_ping_at {
            Some(t) => Utc::now() - t <= freshness,
            None => false,
        }
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub fn new_for_test(slug: &str, base_url: &str, node_type: NodeType) -> Self {
        Self {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: slug.to_string(),
            node_type,
            version: "1.0.0".to_string(),
            base_url: base_url.to_string(),
            api_key: None,
            refresh_token_hash: None,
            refresh_token_expires_at: None,
            capabilities: BTreeSet::new(),
            collections: Vec::new(),
            domains: BTreeSet::new(),
            data_types: BTreeSet::new(),
            keywords: BTreeSet::new(),
            workflows: BTreeSet::new(),
            autonomous_collectors: BTreeSet::new(),
            description: None,
            status: NodeStatus::Active,
            weight: 1,
            active_connections: 0,
            avg_response_time_ms: 0.0,
            ping_failures: 0,
            last_ping_at: Some(Utc::now()),
            success_count: 0,
            failure_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Invoicing Node!!"), "invoicing-node");
        assert_eq!(slugify("  leading and trailing  "), "leading-and-trailing");
    }

    #[test]
    fn serde_round_trip_preserves_fields() {
        let node = Node::new_for_test("invoicing", "http://localhost:9000", NodeType::Child);
        let json = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, node.id);
        assert_eq!(back.slug, node.slug);
        assert_eq!(back.base_url, node.base_url);
        assert_eq!(back.status, node.status);
    }

    #[test]
    fn validate_rejects_zero_weight_and_bad_url() {
        let mut node = Node::new_for_test("x", "http://localhost", NodeType::Child);
        node.weight = 0;
        assert!(node.validate().is_err());
        node.weight = 1;
        node.base_url = "not a url".to_string();
        assert!(node.validate().is_err());
    }
}
