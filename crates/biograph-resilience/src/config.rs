//! Rate-limit and resilience configuration for one external API.

use std::time::Duration;

use biograph_common::{BiographError, Result};
use serde::{Deserialize, Serialize};

/// Immutable per-API resilience settings.
///
/// Built once at process start and shared read-only by the limiter, breaker
/// and retry policy of a single [`ResilientCaller`](crate::ResilientCaller).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst_size: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
    /// Upper bound of the additive jitter, as a fraction of the backoff.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_circuit_timeout")]
    pub circuit_timeout_secs: f64,
    /// Consecutive HALF_OPEN trial successes needed to close the circuit.
    #[serde(default = "default_half_open_successes")]
    pub half_open_success_threshold: u32,
    /// Longest pause before re-checking an open circuit inside the retry loop.
    #[serde(default = "default_circuit_recheck")]
    pub circuit_recheck_secs: f64,
    /// Longest time `acquire()` may wait before failing with `RateLimitExceeded`.
    /// `None` waits as long as needed.
    #[serde(default)]
    pub max_wait_secs: Option<f64>,
    #[serde(default)]
    pub attempt_timeout_secs: Option<f64>,
}

fn default_rps()                 -> f64 { 3.0 }
fn default_rpm()                 -> u32 { 100 }
fn default_burst()               -> u32 { 10 }
fn default_retry_attempts()      -> u32 { 5 }
fn default_base_delay()          -> f64 { 1.0 }
fn default_max_delay()           -> f64 { 60.0 }
fn default_jitter_ratio()        -> f64 { 0.2 }
fn default_failure_threshold()   -> u32 { 5 }
fn default_circuit_timeout()     -> f64 { 300.0 }
fn default_half_open_successes() -> u32 { 3 }
fn default_circuit_recheck()     -> f64 { 1.0 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            requests_per_minute: default_rpm(),
            burst_size: default_burst(),
            retry_attempts: default_retry_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            jitter_ratio: default_jitter_ratio(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_timeout_secs: default_circuit_timeout(),
            half_open_success_threshold: default_half_open_successes(),
            circuit_recheck_secs: default_circuit_recheck(),
            max_wait_secs: None,
            attempt_timeout_secs: None,
        }
    }
}

impl RateLimitConfig {
    /// NCBI E-utilities without an API key: 3 req/s.
    pub fn ncbi() -> Self {
        Self {
            requests_per_second: 3.0,
            requests_per_minute: 100,
            burst_size: 5,
            retry_attempts: 5,
            base_delay_secs: 2.0,
            max_delay_secs: 60.0,
            circuit_failure_threshold: 5,
            circuit_timeout_secs: 300.0,
            ..Default::default()
        }
    }

    /// Hosted embedding endpoints allow a much higher rate.
    pub fn embeddings() -> Self {
        Self {
            requests_per_second: 10.0,
            requests_per_minute: 500,
            burst_size: 20,
            retry_attempts: 5,
            base_delay_secs: 1.0,
            max_delay_secs: 30.0,
            ..Default::default()
        }
    }

    /// Graph / vector store adapters: generous rate, short cooldown.
    pub fn stores() -> Self {
        Self {
            requests_per_second: 50.0,
            requests_per_minute: 3_000,
            burst_size: 50,
            retry_attempts: 3,
            base_delay_secs: 0.5,
            max_delay_secs: 10.0,
            circuit_timeout_secs: 30.0,
            ..Default::default()
        }
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_max_wait(mut self, secs: f64) -> Self {
        self.max_wait_secs = Some(secs);
        self
    }

    pub fn base_delay(&self) -> Duration { secs(self.base_delay_secs) }
    pub fn max_delay(&self) -> Duration { secs(self.max_delay_secs) }
    pub fn circuit_timeout(&self) -> Duration { secs(self.circuit_timeout_secs) }
    pub fn circuit_recheck(&self) -> Duration { secs(self.circuit_recheck_secs) }
    pub fn max_wait(&self) -> Option<Duration> { self.max_wait_secs.map(secs) }
    pub fn attempt_timeout(&self) -> Option<Duration> { self.attempt_timeout_secs.map(secs) }

    /// Reject settings that would make the limiter or retry loop misbehave.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            problems.push("requests_per_second must be > 0".to_string());
        }
        if self.requests_per_minute == 0 {
            problems.push("requests_per_minute must be > 0".to_string());
        }
        if self.burst_size == 0 {
            problems.push("burst_size must be > 0".to_string());
        }
        if self.retry_attempts == 0 {
            problems.push("retry_attempts must be >= 1".to_string());
        }
        if self.circuit_failure_threshold == 0 {
            problems.push("circuit_failure_threshold must be >= 1".to_string());
        }
        if self.half_open_success_threshold == 0 {
            problems.push("half_open_success_threshold must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            problems.push(format!("jitter_ratio {} outside [0, 1]", self.jitter_ratio));
        }
        for (name, v) in [
            ("base_delay_secs", self.base_delay_secs),
            ("max_delay_secs", self.max_delay_secs),
            ("circuit_timeout_secs", self.circuit_timeout_secs),
            ("circuit_recheck_secs", self.circuit_recheck_secs),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                problems.push(format!("{name} must be a non-negative number"));
            }
        }
        if self.base_delay_secs > self.max_delay_secs {
            problems.push("base_delay_secs exceeds max_delay_secs".to_string());
        }
        if let Some(w) = self.max_wait_secs {
            if !(w.is_finite() && w >= 0.0) {
                problems.push("max_wait_secs must be a non-negative number".to_string());
            }
        }
        if let Some(t) = self.attempt_timeout_secs {
            if !(t.is_finite() && t > 0.0) {
                problems.push("attempt_timeout_secs must be > 0".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BiographError::Config(problems.join("; ")))
        }
    }
}

fn secs(v: f64) -> Duration {
    Duration::try_from_secs_f64(v).unwrap_or(Duration::ZERO)
}
