//! Result Merger (C7) — combines per-node search results into one ranked,
//! deduplicated list (spec §4.7). Five strategies select/order candidates;
//! dedup runs first (when enabled) so every strategy works over a
//! collision-free set.

use std::collections::{BTreeMap, HashSet};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{MergeStrategy, MergerConfig};
use crate::wire::WireSearchResult;

/// One peer's contribution to a fan-out, tagged with the node it came
/// from and that node's dispatch priority (lower = higher priority, used
/// by `node_priority`).
#[derive(Debug, Clone)]
pub struct NodeResults {
    pub node_id: Uuid,
    pub node_priority: u32,
    pub results: Vec<WireSearchResult>,
}

#[derive(Debug, Clone)]
pub struct MergedResult {
    pub node_id: Uuid,
    pub result: WireSearchResult,
}

/// Shape of the final, post-merge result set (spec §4.7) — computed over
/// the returned list, not the raw per-node input, so it reflects what the
/// caller actually received.
#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    pub by_node: BTreeMap<Uuid, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub avg_score: f64,
    pub min_score: f64,
    pub max_score: f64,
}

fn compute_stats(out: &[MergedResult]) -> MergeStats {
    let mut by_node: BTreeMap<Uuid, usize> = BTreeMap::new();
    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut sum = 0.0;
    let mut min_score = f64::INFINITY;
    let mut max_score = f64::NEG_INFINITY;

    for r in out {
        *by_node.entry(r.node_id).or_insert(0) += 1;
        let type_key = r.result.model_class.clone().unwrap_or_else(|| "unknown".to_string());
        *by_type.entry(type_key).or_insert(0) += 1;
        sum += r.result.score;
        min_score = min_score.min(r.result.score);
        max_score = max_score.max(r.result.score);
    }

    if out.is_empty() {
        return MergeStats::default();
    }
    MergeStats {
        by_node,
        by_type,
        avg_score: sum / out.len() as f64,
        min_score,
        max_score,
    }
}

pub struct Merger {
    config: MergerConfig,
}

/// Stable dedup key for a result: prefer `model_class:id` when both are
/// present (matches records across nodes that expose the same logical
/// entity), otherwise hash the normalized content.
fn dedup_key(r: &WireSearchResult) -> String {
    if let Some(class) = &r.model_class {
        format!("{}:{}", class, r.id)
    } else {
        let normalized = r.content.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Merger {
    pub fn new(config: MergerConfig) -> Self {
        Self { config }
    }

    pub fn merge(&self, limit: usize, per_node: Vec<NodeResults>) -> (Vec<MergedResult>, MergeStats) {
        let mut flat: Vec<MergedResult> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        // Flatten in node-priority order so, under dedup, the first (i.e.
        // highest-priority) node's copy of a duplicate wins.
        let mut ordered_nodes = per_node;
        ordered_nodes.sort_by_key(|n| n.node_priority);

        for node in ordered_nodes {
            for result in node.results {
                if self.config.deduplication {
                    let key = dedup_key(&result);
                    if !seen.insert(key) {
                        continue;
                    }
                }
                flat.push(MergedResult {
                    node_id: node.node_id,
                    result,
                });
            }
        }

        let ordered = match self.config.strategy {
            MergeStrategy::Score => self.by_score(flat),
            MergeStrategy::RoundRobin => self.by_round_robin(flat),
            MergeStrategy::NodePriority => flat, // already node-priority ordered above
            MergeStrategy::Diversity => self.by_diversity(flat, limit),
            MergeStrategy::Hybrid => self.hybrid(flat, limit),
        };

        let out: Vec<MergedResult> = ordered.into_iter().take(limit).collect();
        let stats = compute_stats(&out);
        (out, stats)
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.config.strategy
    }

    fn by_score(&self, mut flat: Vec<MergedResult>) -> Vec<MergedResult> {
        flat.sort_by(|a, b| {
            b.result
                .score
                .partial_cmp(&a.result.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        flat
    }

    /// Interleave results round-robin across contributing nodes, each
    /// node's own results kept in descending score order.
    fn by_round_robin(&self, flat: Vec<MergedResult>) -> Vec<MergedResult> {
        use std::collections::BTreeMap;
        let mut by_node: BTreeMap<Uuid, Vec<MergedResult>> = BTreeMap::new();
        for r in flat {
            by_node.entry(r.node_id).or_default().push(r);
        }
        for bucket in by_node.values_mut() {
            bucket.sort_by(|a, b| {
                b.result
                    .score
                    .partial_cmp(&a.result.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        let mut out = Vec::new();
        loop {
            let mut any = false;
            for bucket in by_node.values_mut() {
                if let Some(r) = bucket.first() {
                    out.push(r.clone());
                    bucket.remove(0);
                    any = true;
                }
            }
            if !any {
                break;
            }
        }
        out
    }

    /// Score-ordered, but caps how many results any single `model_class`
    /// or any single node may contribute — `max(2, limit/4)` per type,
    /// `max(3, limit/3)` per node (spec §4.7).
    fn by_diversity(&self, flat: Vec<MergedResult>, limit: usize) -> Vec<MergedResult> {
        use std::collections::HashMap;
        let max_per_type = (limit / 4).max(2);
        let max_per_node = (limit / 3).max(3);

        let mut scored = self.by_score(flat);
        let mut per_type: HashMap<String, usize> = HashMap::new();
        let mut per_node: HashMap<Uuid, usize> = HashMap::new();
        let mut out = Vec::new();
        scored.retain(|r| {
            let type_key = r.result.model_class.clone().unwrap_or_default();
            let type_count = per_type.entry(type_key).or_insert(0);
            let node_count = per_node.entry(r.node_id).or_insert(0);
            if *type_count < max_per_type && *node_count < max_per_node {
                *type_count += 1;
                *node_count += 1;
                out.push(r.clone());
                false
            } else {
                true
            }
        });
        // Anything capped out still gets appended after the diverse front,
        // in score order, so `limit` can still be filled if diversity alone
        // can't supply enough distinct results.
        out.extend(scored);
        out
    }

    /// Top `floor(0.7 * limit)` by score, then fill the remainder with the
    /// diversity ordering over what's left (spec §4.7 `hybrid`).
    fn hybrid(&self, flat: Vec<MergedResult>, limit: usize) -> Vec<MergedResult> {
        let top_n = ((limit as f64) * 0.7).floor() as usize;
        let scored = self.by_score(flat);
        let (head, tail) = if scored.len() > top_n {
            scored.split_at(top_n)
        } else {
            (&scored[..], &[][..])
        };
        let mut out = head.to_vec();
        out.extend(self.by_diversity(tail.to_vec(), limit));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(id: &str, model_class: &str, score: f64) -> WireSearchResult {
        WireSearchResult {
            id: id.to_string(),
            content: format!("content-{id}"),
            score,
            model_class: Some(model_class.to_string()),
            model_type: None,
            metadata: json!({}),
            title: None,
            name: None,
            body: None,
        }
    }

    #[test]
    fn dedup_removes_cross_node_duplicates_by_model_class_and_id() {
        let merger = Merger::new(MergerConfig::default());
        let node_a = Uuid::new_v4();
        let node_b = Uuid::new_v4();
        let per_node = vec![
            NodeResults {
                node_id: node_a,
                node_priority: 0,
                results: vec![result("1", "Invoice", 0.9)],
            },
            NodeResults {
                node_id: node_b,
                node_priority: 1,
                results: vec![result("1", "Invoice", 0.5)],
            },
        ];
        let (merged, stats) = merger.merge(10, per_node);
        assert_eq!(merged.len(), 1);
        assert_eq!(stats.by_type.get("Invoice"), Some(&1));
        assert_eq!(merged[0].node_id, node_a); // higher-priority node's copy wins
    }

    #[test]
    fn score_strategy_orders_descending() {
        let merger = Merger::new(MergerConfig {
            strategy: MergeStrategy::Score,
            deduplication: false,
        });
        let per_node = vec![NodeResults {
            node_id: Uuid::new_v4(),
            node_priority: 0,
            results: vec![result("1", "A", 0.2), result("2", "A", 0.8)],
        }];
        let (merged, _) = merger.merge(10, per_node);
        assert_eq!(merged[0].result.id, "2");
        assert_eq!(merged[1].result.id, "1");
    }

    #[test]
    fn diversity_caps_results_per_model_class() {
        let merger = Merger::new(MergerConfig {
            strategy: MergeStrategy::Diversity,
            deduplication: false,
        });
        let results: Vec<_> = (0..10).map(|i| result(&i.to_string(), "Invoice", 1.0 - i as f64 * 0.01)).collect();
        let per_node = vec![NodeResults {
            node_id: Uuid::new_v4(),
            node_priority: 0,
            results,
        }];
        let (merged, _) = merger.merge(8, per_node);
        let invoice_count = merged.iter().filter(|r| r.result.model_class.as_deref() == Some("Invoice")).count();
        assert!(invoice_count <= (8 / 4).max(2) || merged.len() == 8);
    }

    #[test]
    fn hybrid_fills_remainder_after_top_fraction() {
        let merger = Merger::new(MergerConfig {
            strategy: MergeStrategy::Hybrid,
            deduplication: false,
        });
        let results: Vec<_> = (0..10).map(|i| result(&i.to_string(), "A", 1.0 - i as f64 * 0.01)).collect();
        let per_node = vec![NodeResults {
            node_id: Uuid::new_v4(),
            node_priority: 0,
            results,
        }];
        let (merged, stats) = merger.merge(10, per_node);
        assert_eq!(merged.len(), 10);
        assert_eq!(stats.by_type.values().sum::<usize>(), 10);
        assert_eq!(merged[0].result.id, "0"); // top-score result leads
    }
}
