//! Outbound retry policy.
//!
//! # Design Decisions
//! - Never retry POST/PATCH (non-idempotent)
//! - Timeouts and connection failures are retryable, as are 502/503/504
//! - Every attempt is observed separately by the caller's metrics

use std::time::Duration;

use axum::http::{Method, StatusCode};

use super::backoff::calculate_backoff;
use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Attempts allowed for a request with this method.
    pub fn attempts_for(&self, method: &Method) -> u32 {
        if method.is_idempotent() {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

/// Whether a failed attempt may be retried.
///
/// `status` is the peer's answer, if any; `transport_failure` covers
/// timeouts and refused connections.
pub fn is_retryable(method: &Method, status: Option<StatusCode>, transport_failure: bool) -> bool {
    if !method.is_idempotent() {
        return false;
    }
    if transport_failure {
        return true;
    }
    matches!(
        status,
        Some(StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_idempotent_methods_retry() {
        assert!(is_retryable(&Method::GET, None, true));
        assert!(!is_retryable(&Method::POST, None, true));
        assert!(is_retryable(&Method::PUT, Some(StatusCode::SERVICE_UNAVAILABLE), false));
        assert!(!is_retryable(&Method::GET, Some(StatusCode::NOT_FOUND), false));
    }

    #[test]
    fn test_attempts_for_method() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        };
        assert_eq!(policy.attempts_for(&Method::GET), 3);
        assert_eq!(policy.attempts_for(&Method::POST), 1);
        assert_eq!(RetryPolicy::default().attempts_for(&Method::GET), 1);
    }
}
