use std::time::Duration;

use rand::Rng;

use crate::config::RateLimitConfig;

/// Exponential backoff with additive, non-negative jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// `min(base * 2^attempt, max)`, attempt counted from zero.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff plus up to `jitter_ratio` of it, never above `max_delay`.
    /// Jitter only ever adds, so delays never shrink as attempts grow.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.jitter_ratio <= 0.0 || backoff.is_zero() {
            return backoff;
        }
        let spread = backoff.mul_f64(self.jitter_ratio);
        let jitter = spread.mul_f64(rand::thread_rng().gen_range(0.0..=1.0));
        (backoff + jitter).min(self.max_delay)
    }
}
