//! Load Balancer (C5) — picks which of several candidate nodes should serve
//! a request. Keyed round-robin counters and weighted selection mirror the
//! `loadbalancer.rs` pattern from the gateway example (weighted round-robin
//! with a per-key `AtomicU64` counter); `response_time` composite scoring
//! is new, combining the node's own live counters the way the registry
//! tracks them.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use rand::Rng;

use crate::config::{BalancerConfig, BalancerStrategy};
use crate::registry::Node;

pub struct LoadBalancer {
    round_robin_counters: DashMap<String, AtomicU64>,
    config: BalancerConfig,
}

impl LoadBalancer {
    pub fn new(config: BalancerConfig) -> Self {
        Self {
            round_robin_counters: DashMap::new(),
            config,
        }
    }

    /// Select up to `config.max_nodes` (or all, if unset) nodes from
    /// `candidates`, ordered by the configured strategy (spec §4.5).
    /// `key` scopes the round-robin counter — typically the collection or
    /// route being served, so unrelated routes don't share a cursor.
    pub fn select_nodes(&self, key: &str, candidates: &[Node]) -> Vec<Node> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let ordered = match self.config.strategy {
            BalancerStrategy::RoundRobin => self.round_robin_order(key, candidates),
            BalancerStrategy::LeastConnections => self.least_connections_order(candidates),
            BalancerStrategy::Weighted => self.weighted_order(key, candidates),
            BalancerStrategy::ResponseTime => self.response_time_order(candidates),
            BalancerStrategy::Random => self.random_order(candidates),
        };
        match self.config.max_nodes {
            Some(max) => ordered.into_iter().take(max).collect(),
            None => ordered,
        }
    }

    fn next_counter(&self, key: &str) -> u64 {
        let counter = self
            .round_robin_counters
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(1, Ordering::Relaxed)
    }

    fn round_robin_order(&self, key: &str, candidates: &[Node]) -> Vec<Node> {
        let start = (self.next_counter(key) as usize) % candidates.len();
        candidates
            .iter()
            .cycle()
            .skip(start)
            .take(candidates.len())
            .cloned()
            .collect()
    }

    fn least_connections_order(&self, candidates: &[Node]) -> Vec<Node> {
        let mut ordered = candidates.to_vec();
        ordered.sort_by_key(|n| n.active_connections);
        ordered
    }

    /// Weighted round-robin: pick a cursor into `[0, total_weight)` that
    /// advances on every call, then walk the weight table to find the
    /// owning node, and lay the rest out after it by descending weight.
    fn weighted_order(&self, key: &str, candidates: &[Node]) -> Vec<Node> {
        let total_weight: u32 = candidates.iter().map(|n| n.weight).sum();
        if total_weight == 0 {
            return candidates.to_vec();
        }
        let cursor = (self.next_counter(key) % total_weight as u64) as u32;
        let mut acc = 0u32;
        let mut first_idx = 0;
        for (i, n) in candidates.iter().enumerate() {
            acc += n.weight;
            if cursor < acc {
                first_idx = i;
                break;
            }
        }
        let mut ordered = Vec::with_capacity(candidates.len());
        ordered.push(candidates[first_idx].clone());
        let mut rest: Vec<Node> = candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != first_idx)
            .map(|(_, n)| n.clone())
            .collect();
        rest.sort_by(|a, b| b.weight.cmp(&a.weight));
        ordered.extend(rest);
        ordered
    }

    /// Composite score `alpha*active_connections + beta*avg_response_time +
    /// gamma*(1 - success_rate)`, ascending — the default strategy (spec
    /// §4.5). Lower is better.
    fn response_time_order(&self, candidates: &[Node]) -> Vec<Node> {
        let mut ordered = candidates.to_vec();
        ordered.sort_by(|a, b| {
            self.score(a)
                .partial_cmp(&self.score(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ordered
    }

    fn score(&self, node: &Node) -> f64 {
        let total = node.success_count + node.failure_count;
        let failure_rate = if total == 0 {
            0.0
        } else {
            node.failure_count as f64 / total as f64
        };
        self.config.alpha * node.active_connections as f64
            + self.config.beta * node.avg_response_time_ms
            + self.config.gamma * failure_rate
    }

    fn random_order(&self, candidates: &[Node]) -> Vec<Node> {
        let mut ordered = candidates.to_vec();
        let mut rng = rand::thread_rng();
        for i in (1..ordered.len()).rev() {
            let j = rng.gen_range(0..=i);
            ordered.swap(i, j);
        }
        ordered
    }

    /// Proportionally split `total` units of work across `candidates` by
    /// weight (spec §4.5 `distributeLoad`), largest-remainder rounding so
    /// the shares always sum to `total`.
    pub fn distribute_load(&self, candidates: &[Node], total: usize) -> Vec<(uuid::Uuid, usize)> {
        if candidates.is_empty() || total == 0 {
            return Vec::new();
        }
        let total_weight: u32 = candidates.iter().map(|n| n.weight).sum();
        if total_weight == 0 {
            let share = total / candidates.len();
            let mut remainder = total % candidates.len();
            return candidates
                .iter()
                .map(|n| {
                    let extra = if remainder > 0 {
                        remainder -= 1;
                        1
                    } else {
                        0
                    };
                    (n.id, share + extra)
                })
                .collect();
        }
        let raw: Vec<f64> = candidates
            .iter()
            .map(|n| total as f64 * n.weight as f64 / total_weight as f64)
            .collect();
        let mut shares: Vec<usize> = raw.iter().map(|v| v.floor() as usize).collect();
        let mut assigned: usize = shares.iter().sum();
        let mut remainders: Vec<(usize, f64)> = raw
            .iter()
            .enumerate()
            .map(|(i, v)| (i, v.fract()))
            .collect();
        remainders.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let mut i = 0;
        while assigned < total && i < remainders.len() {
            shares[remainders[i].0] += 1;
            assigned += 1;
            i += 1;
        }
        candidates.iter().zip(shares).map(|(n, s)| (n.id, s)).collect()
    }
}
