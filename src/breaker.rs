//! Circuit Breaker (C4) — per-node closed/open/half-open state machine
//! (spec §4.4). Generalizes the backend's own `state::CircuitBreaker`
//! (atomics-only, closed/tripped) into the full three-state machine the
//! fabric needs, keeping its lock-light style: counters are atomics, and
//! only the two timestamps share a single mutex, so `is_open`/`record_*`
//! never hold more than one per-node lock at a time (spec §5).

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for BreakerState {
    fn from(v: u8) -> Self {
        match v {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl From<BreakerState> for u8 {
    fn from(s: BreakerState) -> Self {
        match s {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }
}

/// Snapshot of breaker state for one node — returned by `snapshot()` for
/// observability/tests; never the live mutable record itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

struct Timestamps {
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
}

/// Per-node breaker record. Counters are plain atomics; the four
/// timestamps (which must update together) share one small mutex.
struct NodeBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    timestamps: Mutex<Timestamps>,
}

impl NodeBreaker {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(BreakerState::Closed.into()),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            timestamps: Mutex::new(Timestamps {
                last_failure_at: None,
                last_success_at: None,
                opened_at: None,
                next_retry_at: None,
            }),
        }
    }
}

/// Registry of per-node circuit breakers, keyed by node id.
pub struct BreakerRegistry {
    breakers: DashMap<Uuid, NodeBreaker>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    fn entry(&self, node_id: Uuid) -> dashmap::mapref::one::Ref<'_, Uuid, NodeBreaker> {
        self.breakers
            .entry(node_id)
            .or_insert_with(NodeBreaker::new);
        self.breakers.get(&node_id).unwrap()
    }

    /// The authoritative "may I call this node?" predicate. Callers MUST
    /// check this before dispatch and skip the node if it returns `true`.
    /// Transitions `open -> half_open` in place when the retry timeout has
    /// elapsed, admitting exactly one probe batch (spec §4.4).
    pub fn is_open(&self, node_id: Uuid) -> bool {
        let b = self.entry(node_id);
        let state: BreakerState = b.state.load(Ordering::Acquire).into();
        match state {
            BreakerState::Closed => false,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let now = Utc::now();
                let should_probe = {
                    let ts = b.timestamps.lock().unwrap();
                    ts.next_retry_at.is_some_and(|t| now >= t)
                };
                if should_probe {
                    b.state
                        .store(BreakerState::HalfOpen.into(), Ordering::Release);
                    b.failure_count.store(0, Ordering::Relaxed);
                    b.success_count.store(0, Ordering::Relaxed);
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Record a successful call. In `closed`, resets the failure counter.
    /// In `half_open`, closes the breaker once `success_threshold`
    /// consecutive successes are observed.
    pub fn record_success(&self, node_id: Uuid) {
        let b = self.entry(node_id);
        let now = Utc::now();
        {
            let mut ts = b.timestamps.lock().unwrap();
            ts.last_success_at = Some(now);
        }
        let state: BreakerState = b.state.load(Ordering::Acquire).into();
        match state {
            BreakerState::Closed => {
                b.failure_count.store(0, Ordering::Relaxed);
            }
            BreakerState::HalfOpen => {
                let count = b.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if count >= self.config.success_threshold {
                    b.state.store(BreakerState::Closed.into(), Ordering::Release);
                    b.failure_count.store(0, Ordering::Relaxed);
                    b.success_count.store(0, Ordering::Relaxed);
                    let mut ts = b.timestamps.lock().unwrap();
                    ts.opened_at = None;
                    ts.next_retry_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call. In `closed`, opens the breaker once
    /// `failure_threshold` consecutive failures are observed. In
    /// `half_open`, a single failure re-opens it and extends the retry
    /// deadline.
    pub fn record_failure(&self, node_id: Uuid) {
        let b = self.entry(node_id);
        let now = Utc::now();
        {
            let mut ts = b.timestamps.lock().unwrap();
            ts.last_failure_at = Some(now);
        }
        let state: BreakerState = b.state.load(Ordering::Acquire).into();
        match state {
            BreakerState::Closed => {
                let count = b.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if count >= self.config.failure_threshold {
                    self.trip(&b, now);
                }
            }
            BreakerState::HalfOpen => {
                self.trip(&b, now);
            }
            BreakerState::Open => {
                let mut ts = b.timestamps.lock().unwrap();
                ts.next_retry_at = Some(now + self.config.retry_timeout());
            }
        }
    }

    fn trip(&self, b: &NodeBreaker, now: DateTime<Utc>) {
        b.state.store(BreakerState::Open.into(), Ordering::Release);
        b.success_count.store(0, Ordering::Relaxed);
        let mut ts = b.timestamps.lock().unwrap();
        ts.opened_at = Some(now);
        ts.next_retry_at = Some(now + self.config.retry_timeout());
    }

    pub fn snapshot(&self, node_id: Uuid) -> BreakerSnapshot {
        let b = self.entry(node_id);
        let ts = b.timestamps.lock().unwrap();
        BreakerSnapshot {
            state: b.state.load(Ordering::Acquire).into(),
            failure_count: b.failure_count.load(Ordering::Relaxed),
            success_count: b.success_count.load(Ordering::Relaxed),
            last_failure_at: ts.last_failure_at,
            last_success_at: ts.last_success_at,
            opened_at: ts.opened_at,
            next_retry_at: ts.next_retry_at,
        }
    }

    pub fn open_count(&self) -> usize {
        self.breakers
            .iter()
            .filter(|b| BreakerState::from(b.state.load(Ordering::Acquire)) == BreakerState::Open)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BreakerRegistry {
        BreakerRegistry::new(BreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            retry_timeout_secs: 30,
            timeout_secs: 60,
        })
    }

    #[test]
    fn opens_after_failure_threshold_consecutive_failures() {
        let reg = registry();
        let node = Uuid::new_v4();
        for _ in 0..4 {
            reg.record_failure(node);
            assert!(!reg.is_open(node));
        }
        reg.record_failure(node);
        assert!(reg.is_open(node));
        let snap = reg.snapshot(node);
        assert_eq!(snap.state, BreakerState::Open);
        assert!(snap.opened_at.is_some());
    }

    #[test]
    fn success_resets_failure_count_in_closed_state() {
        let reg = registry();
        let node = Uuid::new_v4();
        reg.record_failure(node);
        reg.record_failure(node);
        reg.record_success(node);
        assert_eq!(reg.snapshot(node).failure_count, 0);
        assert!(!reg.is_open(node));
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let reg = registry();
        let node = Uuid::new_v4();
        for _ in 0..5 {
            reg.record_failure(node);
        }
        assert!(reg.is_open(node));

        // Force the retry deadline into the past to simulate elapsed cooldown.
        {
            let b = reg.entry(node);
            let mut ts = b.timestamps.lock().unwrap();
            ts.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
        }
        assert!(!reg.is_open(node)); // transitions to half-open, admits probe
        assert_eq!(reg.snapshot(node).state, BreakerState::HalfOpen);

        reg.record_success(node);
        assert_eq!(reg.snapshot(node).state, BreakerState::HalfOpen);
        reg.record_success(node);
        assert_eq!(reg.snapshot(node).state, BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_extends_retry() {
        let reg = registry();
        let node = Uuid::new_v4();
        for _ in 0..5 {
            reg.record_failure(node);
        }
        {
            let b = reg.entry(node);
            let mut ts = b.timestamps.lock().unwrap();
            ts.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
        }
        assert!(!reg.is_open(node));
        reg.record_failure(node);
        assert_eq!(reg.snapshot(node).state, BreakerState::Open);
        assert!(reg.is_open(node));
    }
}
