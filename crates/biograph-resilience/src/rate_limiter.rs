//! Token bucket + 60 s sliding window limiter.
//!
//! The bucket gives burst tolerance, the window enforces the per-minute
//! ceiling. A call proceeds only when both allow it; the longer of the two
//! waits wins. All state lives behind one async mutex, so concurrent callers
//! sharing a limiter never lose a token update. The lock is never held while
//! sleeping.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use biograph_common::{BiographError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// Length of the sliding window.
pub const WINDOW: Duration = Duration::from_secs(60);

const TOKEN_EPSILON: f64 = 1e-9;
const MIN_TOKEN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct LimiterState {
    tokens: f64,
    last_refill: Instant,
    window: VecDeque<Instant>,
}

#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    rate: f64,
    burst: f64,
    per_minute: usize,
    max_wait: Option<Duration>,
    state: Mutex<LimiterState>,
    acquired: AtomicU64,
    throttled: AtomicU64,
    wait_ms: AtomicU64,
}

/// Point-in-time view of a limiter, reported in run summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub tokens_available: f64,
    pub requests_in_last_minute: usize,
    pub total_acquired: u64,
    pub total_throttled: u64,
    pub total_wait_ms: u64,
}

enum Decision {
    Proceed,
    Wait { wait: Duration, window_bound: bool },
}

impl RateLimiter {
    /// The bucket starts full.
    pub fn new(name: impl Into<String>, config: &RateLimitConfig) -> Self {
        let burst = f64::from(config.burst_size.max(1));
        Self {
            name: name.into(),
            rate: config.requests_per_second,
            burst,
            per_minute: config.requests_per_minute.max(1) as usize,
            max_wait: config.max_wait(),
            state: Mutex::new(LimiterState {
                tokens: burst,
                last_refill: Instant::now(),
                window: VecDeque::new(),
            }),
            acquired: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            wait_ms: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until both the bucket and the window admit one more call, then
    /// consume a token and record the call. Returns the time spent waiting.
    ///
    /// Fails with `RateLimitExceeded` when a configured `max_wait` would be
    /// exceeded; the token is not consumed in that case.
    pub async fn acquire(&self) -> Result<Duration> {
        let mut waited = Duration::ZERO;
        loop {
            let decision = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                self.refill(&mut state, now);
                prune(&mut state.window, now);

                let window_wait = if state.window.len() >= self.per_minute {
                    state
                        .window
                        .front()
                        .map(|oldest| (*oldest + WINDOW).saturating_duration_since(now))
                        .unwrap_or(Duration::ZERO)
                } else {
                    Duration::ZERO
                };

                let token_wait = if state.tokens + TOKEN_EPSILON < 1.0 {
                    let secs = (1.0 - state.tokens) / self.rate;
                    Duration::try_from_secs_f64(secs)
                        .unwrap_or(Duration::MAX)
                        .max(MIN_TOKEN_WAIT)
                } else {
                    Duration::ZERO
                };

                let wait = window_wait.max(token_wait);
                if wait.is_zero() {
                    state.tokens = (state.tokens - 1.0).max(0.0);
                    state.window.push_back(now);
                    Decision::Proceed
                } else {
                    Decision::Wait { wait, window_bound: window_wait >= token_wait }
                }
            };

            match decision {
                Decision::Proceed => {
                    self.acquired.fetch_add(1, Ordering::Relaxed);
                    if !waited.is_zero() {
                        self.throttled.fetch_add(1, Ordering::Relaxed);
                        self.wait_ms
                            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
                    }
                    return Ok(waited);
                }
                Decision::Wait { wait, window_bound } => {
                    if let Some(max_wait) = self.max_wait {
                        let total = waited + wait;
                        if total > max_wait {
                            warn!(api = %self.name, ?total, ?max_wait, "rate limit wait exceeds maximum");
                            return Err(BiographError::RateLimitExceeded { wait: total, max_wait });
                        }
                    }
                    if window_bound {
                        warn!(api = %self.name, ?wait, limit = self.per_minute, "per-minute ceiling reached, waiting");
                    } else {
                        debug!(api = %self.name, ?wait, "token bucket empty, waiting");
                    }
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
            }
        }
    }

    /// Acquire, then drive `fut`.
    pub async fn throttle<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.acquire().await?;
        fut.await
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        self.refill(&mut state, now);
        prune(&mut state.window, now);
        RateLimiterStats {
            tokens_available: state.tokens,
            requests_in_last_minute: state.window.len(),
            total_acquired: self.acquired.load(Ordering::Relaxed),
            total_throttled: self.throttled.load(Ordering::Relaxed),
            total_wait_ms: self.wait_ms.load(Ordering::Relaxed),
        }
    }

    fn refill(&self, state: &mut LimiterState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = window.front() {
        if now.saturating_duration_since(*oldest) >= WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}
