//! Consecutive-failure circuit breaker.
//!
//! CLOSED → OPEN after `circuit_failure_threshold` consecutive failures.
//! OPEN rejects every call until `circuit_timeout` has elapsed, then the next
//! caller moves it to HALF_OPEN. HALF_OPEN admits up to
//! `half_open_success_threshold` trial calls; that many successes close the
//! circuit, a single failure reopens it.

use std::future::Future;
use std::time::Duration;

use biograph_common::{BiographError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed   => "CLOSED",
            CircuitState::Open     => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// The only edges the breaker will ever take.
    pub fn can_transition_to(&self, next: CircuitState) -> bool {
        matches!(
            (self, next),
            (CircuitState::Closed, CircuitState::Open)
                | (CircuitState::Open, CircuitState::HalfOpen)
                | (CircuitState::HalfOpen, CircuitState::Closed)
                | (CircuitState::HalfOpen, CircuitState::Open)
        )
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    times_opened: u64,
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`]. Records which
/// state the call was admitted in so a late outcome from a previous phase is
/// not mistaken for a trial result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPermit {
    admitted_in: CircuitState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub times_opened: u64,
    /// Time left before an OPEN circuit may be probed.
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.circuit_failure_threshold.max(1),
            success_threshold: config.half_open_success_threshold.max(1),
            timeout: config.circuit_timeout(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_in_flight: 0,
                opened_at: None,
                times_opened: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Ask to make a call. Fails with `CircuitOpen` without touching the
    /// downstream when the circuit is OPEN or all trial slots are taken.
    pub async fn try_acquire(&self) -> Result<CircuitPermit> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let opened_at = inner.opened_at.unwrap_or(now);
            let elapsed = now.saturating_duration_since(opened_at);
            if elapsed < self.timeout {
                return Err(self.open_error(self.timeout - elapsed));
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
            inner.half_open_successes = 0;
            inner.half_open_in_flight = 0;
        }

        match inner.state {
            CircuitState::Closed => Ok(CircuitPermit { admitted_in: CircuitState::Closed }),
            CircuitState::HalfOpen => {
                let slots = self.success_threshold.saturating_sub(inner.half_open_successes);
                if inner.half_open_in_flight >= slots {
                    return Err(self.open_error(Duration::ZERO));
                }
                inner.half_open_in_flight += 1;
                Ok(CircuitPermit { admitted_in: CircuitState::HalfOpen })
            }
            CircuitState::Open => Err(self.open_error(self.timeout)),
        }
    }

    pub async fn on_success(&self, permit: CircuitPermit) {
        let mut inner = self.inner.lock().await;
        match (inner.state, permit.admitted_in) {
            (CircuitState::Closed, _) => inner.consecutive_failures = 0,
            (CircuitState::HalfOpen, CircuitState::HalfOpen) => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 0;
                    inner.opened_at = None;
                }
            }
            // Stale outcome from a call admitted before the circuit opened.
            _ => {}
        }
    }

    pub async fn on_failure(&self, permit: CircuitPermit) {
        let mut inner = self.inner.lock().await;
        match (inner.state, permit.admitted_in) {
            (CircuitState::Closed, _) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            (CircuitState::HalfOpen, CircuitState::HalfOpen) => {
                inner.consecutive_failures = self.failure_threshold;
                self.trip(&mut inner);
            }
            _ => {}
        }
    }

    /// Outcome that says nothing about downstream health (e.g. a permanent
    /// 4xx). Frees a trial slot without counting either way.
    pub async fn on_neutral(&self, permit: CircuitPermit) {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::HalfOpen && permit.admitted_in == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Run `fut` under the breaker. Only errors for which
    /// `counts_against_circuit()` holds are recorded as failures.
    pub async fn call<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let permit = self.try_acquire().await?;
        let outcome = fut.await;
        match &outcome {
            Ok(_) => self.on_success(permit).await,
            Err(e) if e.counts_against_circuit() => self.on_failure(permit).await,
            Err(_) => self.on_neutral(permit).await,
        }
        outcome
    }

    pub async fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().await;
        let retry_after_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                let elapsed = Instant::now().saturating_duration_since(opened_at);
                Some(self.timeout.saturating_sub(elapsed).as_millis() as u64)
            }
            _ => None,
        };
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
            times_opened: inner.times_opened,
            retry_after_ms,
        }
    }

    fn trip(&self, inner: &mut BreakerInner) {
        self.transition(inner, CircuitState::Open);
        inner.opened_at = Some(Instant::now());
        inner.half_open_successes = 0;
        inner.half_open_in_flight = 0;
        inner.times_opened += 1;
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitState) {
        debug_assert!(inner.state.can_transition_to(next), "{} -> {}", inner.state, next);
        let prev = inner.state;
        inner.state = next;
        match next {
            CircuitState::Open => error!(
                api = %self.name,
                from = %prev,
                failures = inner.consecutive_failures,
                timeout = ?self.timeout,
                "circuit breaker OPEN"
            ),
            _ => info!(api = %self.name, from = %prev, to = %next, "circuit breaker transition"),
        }
    }

    fn open_error(&self, retry_after: Duration) -> BiographError {
        BiographError::CircuitOpen { api: self.name.clone(), retry_after }
    }
}
