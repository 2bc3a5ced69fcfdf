use std::sync::atomic::{AtomicU64, Ordering};

use biograph_common::BiographError;
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitSnapshot;
use crate::rate_limiter::RateLimiterStats;

/// Per-attempt counters. One lives on every [`ResilientCaller`](crate::ResilientCaller)
/// and tasks may keep their own to report only the calls they made.
#[derive(Debug, Default)]
pub struct CallStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    transient_failures: AtomicU64,
    permanent_failures: AtomicU64,
    rate_limited: AtomicU64,
    circuit_rejections: AtomicU64,
    retries: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCounts {
    pub attempts: u64,
    pub successes: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
    pub rate_limited: u64,
    pub circuit_rejections: u64,
    pub retries: u64,
}

impl CallCounts {
    pub fn merge(&mut self, other: &CallCounts) {
        self.attempts += other.attempts;
        self.successes += other.successes;
        self.transient_failures += other.transient_failures;
        self.permanent_failures += other.permanent_failures;
        self.rate_limited += other.rate_limited;
        self.circuit_rejections += other.circuit_rejections;
        self.retries += other.retries;
    }
}

impl CallStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, err: &BiographError) {
        let counter = match err {
            BiographError::CircuitOpen { .. } => &self.circuit_rejections,
            BiographError::RateLimitExceeded { .. } => &self.rate_limited,
            e if e.is_retryable() => &self.transient_failures,
            _ => &self.permanent_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> CallCounts {
        CallCounts {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Final limiter / breaker state for one API, attached to task results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiTelemetry {
    pub api: String,
    pub limiter: RateLimiterStats,
    pub circuit: CircuitSnapshot,
    pub calls: CallCounts,
}
