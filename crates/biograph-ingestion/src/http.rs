//! Shared HTTP plumbing: client construction and the mapping from `reqwest`
//! outcomes onto the transient / permanent split the retry loop relies on.

use std::time::Duration;

use biograph_common::{BiographError, Result};
use reqwest::{Response, StatusCode};

pub const USER_AGENT: &str = concat!("biograph/", env!("CARGO_PKG_VERSION"));

pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| BiographError::Config(format!("failed to build HTTP client: {e}")))
}

/// Timeouts and connection failures are worth retrying; a request we built
/// wrong is not.
pub fn map_reqwest_error(err: reqwest::Error) -> BiographError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        return BiographError::transient(err.to_string());
    }
    if let Some(status) = err.status() {
        return classify_status(status, &err.to_string());
    }
    if err.is_decode() || err.is_builder() {
        return BiographError::permanent(err.to_string());
    }
    BiographError::transient(err.to_string())
}

/// 429 and 5xx are transient, other 4xx are permanent.
pub fn classify_status(status: StatusCode, detail: &str) -> BiographError {
    let msg = format!("HTTP {status}: {detail}");
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        BiographError::Transient(msg)
    } else {
        BiographError::Permanent(msg)
    }
}

/// Turn a non-2xx response into the matching error, keeping a short body
/// excerpt for the log.
pub async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    Err(classify_status(status, excerpt.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "").is_retryable());
        assert!(!classify_status(StatusCode::NOT_FOUND, "").is_retryable());
    }

    #[test]
    fn test_client_builds() {
        assert!(build_client(Duration::from_secs(5)).is_ok());
    }
}
