//! biograph-resilience: Protection for outbound calls to rate-limited,
//! occasionally degraded third-party APIs.
//!
//! Layers, innermost last:
//! - [`RateLimiter`]: token bucket (burst) + 60 s sliding window (ceiling)
//! - [`CircuitBreaker`]: CLOSED / OPEN / HALF_OPEN fail-fast gate
//! - optional per-attempt timeout
//!
//! [`ResilientCaller`] wraps them in an exponential-backoff retry loop and is
//! constructed once per external API, then shared by every task calling it.

pub mod config;
pub mod rate_limiter;
pub mod circuit_breaker;
pub mod retry;
pub mod stats;
pub mod caller;

pub use caller::ResilientCaller;
pub use circuit_breaker::{CircuitBreaker, CircuitPermit, CircuitSnapshot, CircuitState};
pub use config::RateLimitConfig;
pub use rate_limiter::{RateLimiter, RateLimiterStats, WINDOW};
pub use retry::RetryPolicy;
pub use stats::{ApiTelemetry, CallCounts, CallStats};
