//! Clock abstraction for JWT time validation — grounded on
//! `caliber-api/src/auth.rs`'s `JwtClock`: owning time ourselves keeps
//! expiry tests deterministic instead of racing real wall-clock time.

use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now_epoch_secs(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests; `advance` lets a test move time
/// forward without sleeping.
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn new(epoch_secs: i64) -> Self {
        Self(AtomicI64::new(epoch_secs))
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Clock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}
