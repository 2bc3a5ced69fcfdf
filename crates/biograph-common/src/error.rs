use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BiographError {
    /// Network blip, 5xx, timeout. Retryable.
    #[error("Transient error: {0}")]
    Transient(String),

    /// 4xx validation, malformed response. Never retried.
    #[error("Permanent error: {0}")]
    Permanent(String),

    #[error("Rate limit exceeded: required wait {wait:?} exceeds maximum {max_wait:?}")]
    RateLimitExceeded { wait: Duration, max_wait: Duration },

    #[error("Circuit breaker for {api} is open (retry after {retry_after:?})")]
    CircuitOpen { api: String, retry_after: Duration },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BiographError>;

/// Coarse classification reported in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
    RateLimited,
    CircuitOpen,
    Config,
    Store,
    Workflow,
    Cancelled,
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient   => "transient",
            ErrorClass::Permanent   => "permanent",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::CircuitOpen => "circuit_open",
            ErrorClass::Config      => "config",
            ErrorClass::Store       => "store",
            ErrorClass::Workflow    => "workflow",
            ErrorClass::Cancelled   => "cancelled",
            ErrorClass::Internal    => "internal",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BiographError {
    pub fn transient(msg: impl Into<String>) -> Self {
        BiographError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        BiographError::Permanent(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        BiographError::Store(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            BiographError::Transient(_)              => ErrorClass::Transient,
            BiographError::Permanent(_)              => ErrorClass::Permanent,
            BiographError::RateLimitExceeded { .. }  => ErrorClass::RateLimited,
            BiographError::CircuitOpen { .. }        => ErrorClass::CircuitOpen,
            BiographError::Config(_)                 => ErrorClass::Config,
            BiographError::Store(_)                  => ErrorClass::Store,
            BiographError::Workflow(_)               => ErrorClass::Workflow,
            BiographError::Cancelled                 => ErrorClass::Cancelled,
            BiographError::Io(_)
            | BiographError::Serialization(_)        => ErrorClass::Internal,
        }
    }

    /// Whether a call that failed with this error may be attempted again.
    ///
    /// Store adapters talk to network databases, so their failures are
    /// treated like transient API failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Transient
                | ErrorClass::Store
                | ErrorClass::RateLimited
                | ErrorClass::CircuitOpen
        )
    }

    /// Failures that say something about the health of the downstream
    /// dependency. Only these move a circuit breaker.
    pub fn counts_against_circuit(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::Store)
    }
}
