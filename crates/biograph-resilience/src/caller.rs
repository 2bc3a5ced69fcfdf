//! The composed call wrapper used for every external invocation:
//! `limiter.throttle(breaker.call(timeout(op())))` inside a retry loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use biograph_common::{BiographError, Result};
use tracing::{debug, error, instrument, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::RateLimitConfig;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::stats::{ApiTelemetry, CallCounts, CallStats};

/// One per external API, constructed at startup and shared by reference
/// (`Arc<ResilientCaller>`) across every task that talks to that API.
#[derive(Debug)]
pub struct ResilientCaller {
    name: String,
    config: RateLimitConfig,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    stats: CallStats,
}

impl ResilientCaller {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let limiter = Arc::new(RateLimiter::new(name.clone(), &config));
        let breaker = Arc::new(CircuitBreaker::new(name.clone(), &config));
        Ok(Self::from_parts(name, config, limiter, breaker))
    }

    /// Build around an existing limiter and breaker, e.g. to let two callers
    /// with different retry budgets share one quota.
    pub fn from_parts(
        name: impl Into<String>,
        config: RateLimitConfig,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            name: name.into(),
            config,
            limiter,
            breaker,
            policy,
            stats: CallStats::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn counts(&self) -> CallCounts {
        self.stats.counts()
    }

    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.call_tracked(None, op).await
    }

    /// Like [`call`](Self::call), also recording every attempt into `local`
    /// so a task can report the calls it made separately from other tasks
    /// sharing this caller.
    #[instrument(level = "debug", skip_all, fields(api = %self.name))]
    pub async fn call_tracked<F, Fut, T>(&self, local: Option<&CallStats>, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts;
        let record = |f: fn(&CallStats)| {
            f(&self.stats);
            if let Some(s) = local {
                f(s);
            }
        };

        let mut attempt = 0u32;
        loop {
            record(CallStats::record_attempt);
            let invocation = with_timeout(op(), self.config.attempt_timeout());
            let outcome = self.limiter.throttle(self.breaker.call(invocation)).await;

            let err = match outcome {
                Ok(value) => {
                    record(CallStats::record_success);
                    if attempt > 0 {
                        debug!(api = %self.name, attempts = attempt + 1, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };
            self.stats.record_error(&err);
            if let Some(s) = local {
                s.record_error(&err);
            }

            if !err.is_retryable() {
                warn!(api = %self.name, error = %err, "non-retryable failure");
                return Err(err);
            }
            if attempt + 1 >= max_attempts {
                error!(api = %self.name, attempts = max_attempts, error = %err, "retry budget exhausted");
                return Err(err);
            }

            let delay = match &err {
                // The breaker already encodes a cooldown: re-check soon
                // instead of stacking exponential backoff on top.
                BiographError::CircuitOpen { retry_after, .. } => {
                    let recheck = self.config.circuit_recheck();
                    if retry_after.is_zero() { recheck } else { (*retry_after).min(recheck) }
                }
                BiographError::RateLimitExceeded { wait, .. } => *wait,
                _ => self.policy.delay_for(attempt),
            };
            warn!(
                api = %self.name,
                attempt = attempt + 1,
                max_attempts,
                ?delay,
                error = %err,
                "call failed, retrying"
            );
            record(CallStats::record_retry);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub async fn telemetry(&self) -> ApiTelemetry {
        ApiTelemetry {
            api: self.name.clone(),
            limiter: self.limiter.stats().await,
            circuit: self.breaker.snapshot().await,
            calls: self.stats.counts(),
        }
    }
}

async fn with_timeout<F, T>(fut: F, limit: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => Err(BiographError::transient(format!("attempt timed out after {limit:?}"))),
        },
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::circuit_breaker::CircuitState;

    fn fast_config(attempts: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: 1000.0,
            requests_per_minute: 100_000,
            burst_size: 1000,
            retry_attempts: attempts,
            base_delay_secs: 1.0,
            max_delay_secs: 8.0,
            jitter_ratio: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let caller = ResilientCaller::new("api", fast_config(4)).unwrap();
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let res = caller
            .call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(BiographError::transient("503"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(res, 3);
        // 1 + 2 + 4 seconds of backoff.
        assert!(start.elapsed() >= Duration::from_secs(7));
        let c = caller.counts();
        assert_eq!(c.attempts, 4);
        assert_eq!(c.retries, 3);
        assert_eq!(c.transient_failures, 3);
        assert_eq!(c.successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let caller = ResilientCaller::new("api", fast_config(5)).unwrap();
        let calls = AtomicU32::new(0);
        let res: Result<()> = caller
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BiographError::permanent("400 bad term")) }
            })
            .await;
        assert!(matches!(res, Err(BiographError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(caller.counts().permanent_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let caller = ResilientCaller::new("api", fast_config(3)).unwrap();
        let res: Result<()> = caller
            .call(|| async { Err(BiographError::transient("still 503")) })
            .await;
        assert!(matches!(res, Err(BiographError::Transient(m)) if m == "still 503"));
        let c = caller.counts();
        assert_eq!(c.attempts, 3);
        assert_eq!(c.retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_waits_only_recheck_interval() {
        let cfg = RateLimitConfig {
            circuit_failure_threshold: 1,
            circuit_timeout_secs: 300.0,
            circuit_recheck_secs: 0.5,
            ..fast_config(3)
        };
        let caller = ResilientCaller::new("api", cfg).unwrap();
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let res: Result<()> = caller
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BiographError::transient("down")) }
            })
            .await;
        // First attempt trips the breaker, the rest are rejected without invoking.
        assert!(matches!(res, Err(BiographError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(caller.counts().circuit_rejections, 2);
        assert_eq!(caller.breaker().state().await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let cfg = RateLimitConfig { attempt_timeout_secs: Some(2.0), ..fast_config(2) };
        let caller = ResilientCaller::new("api", cfg).unwrap();
        let calls = AtomicU32::new(0);
        let res = caller
            .call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                    Ok("done")
                }
            })
            .await
            .unwrap();
        assert_eq!(res, "done");
        assert_eq!(caller.counts().transient_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_stats_track_only_own_calls() {
        let caller = Arc::new(ResilientCaller::new("api", fast_config(3)).unwrap());
        let mine = CallStats::new();
        caller.call(|| async { Ok(()) }).await.unwrap();
        caller.call_tracked(Some(&mine), || async { Ok(()) }).await.unwrap();
        assert_eq!(mine.counts().attempts, 1);
        assert_eq!(caller.counts().attempts, 2);

        let t = caller.telemetry().await;
        assert_eq!(t.api, "api");
        assert_eq!(t.limiter.total_acquired, 2);
        assert_eq!(t.circuit.state, CircuitState::Closed);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let cfg = RateLimitConfig { retry_attempts: 0, ..Default::default() };
        assert!(matches!(ResilientCaller::new("api", cfg), Err(BiographError::Config(_))));
    }
}
