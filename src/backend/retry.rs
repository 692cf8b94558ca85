//! Per-fragment retry policy for upload sessions.
//!
//! A failed fragment PUT is classified into a [`FailureType`], and the
//! [`FragmentRetryPolicy`] turns that plus the attempt index into a
//! [`RetryDecision`]:
//!
//! - [`FailureType::ServerError`] (5xx) - retry after `2^attempt * base_delay`
//! - [`FailureType::ClientError`] (4xx other than 404) - retry immediately
//! - [`FailureType::SessionGone`] (404) - never retry, the session is gone
//! - [`FailureType::Unrecoverable`] - never retry
//!
//! Exhaustion is checked first: once the attempt budget is spent no failure
//! type is retried.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use graphdrive_core::backend::{FailureType, FragmentRetryPolicy, RetryDecision};
//!
//! let policy = FragmentRetryPolicy::new(5, Duration::from_millis(500));
//!
//! match policy.should_retry(FailureType::ServerError, 1) {
//!     RetryDecision::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(1)),
//!     RetryDecision::DoNotRetry { reason } => panic!("{reason}"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::error::BackendError;

/// Classification of a failed fragment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// 404: the upload session no longer exists.
    SessionGone,
    /// 5xx: retry with exponential backoff.
    ServerError,
    /// Any other 4xx: retry without delay.
    ClientError,
    /// Transport, local I/O or decode failure.
    Unrecoverable,
}

/// Decision on whether to retry a failed fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resend the fragment after `delay`.
    Retry {
        /// How long to wait before resending.
        delay: Duration,
        /// Zero-based index of the next attempt.
        attempt: u32,
    },

    /// Give up on the fragment (and the session).
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Classifies a fragment failure by its HTTP status.
#[must_use]
pub fn classify_failure(error: &BackendError) -> FailureType {
    match error {
        BackendError::NotFound { .. } => FailureType::SessionGone,
        BackendError::Protocol { context } => match context.status {
            500..=599 => FailureType::ServerError,
            400..=499 => FailureType::ClientError,
            _ => FailureType::Unrecoverable,
        },
        _ => FailureType::Unrecoverable,
    }
}

/// Bounded retry policy with exponential backoff for server errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRetryPolicy {
    /// Attempts per fragment, including the first (at least 1).
    max_attempts: u32,

    /// Delay before the first retry of a server error.
    base_delay: Duration,
}

impl FragmentRetryPolicy {
    /// Creates a policy; `max_attempts` below 1 is raised to 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Maximum attempts per fragment.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether to retry after attempt `attempt` (zero-based) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure: FailureType, attempt: u32) -> RetryDecision {
        if attempt.saturating_add(1) >= self.max_attempts {
            debug!("fragment retries exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("gave up after {} attempts", self.max_attempts),
            };
        }

        match failure {
            FailureType::ServerError => {
                let delay = self.backoff_delay(attempt);
                debug!(delay_ms = delay.as_millis(), "retrying fragment after backoff");
                RetryDecision::Retry {
                    delay,
                    attempt: attempt + 1,
                }
            }
            FailureType::ClientError => {
                debug!("retrying fragment immediately");
                RetryDecision::Retry {
                    delay: Duration::ZERO,
                    attempt: attempt + 1,
                }
            }
            FailureType::SessionGone => RetryDecision::DoNotRetry {
                reason: "upload session no longer exists".to_string(),
            },
            FailureType::Unrecoverable => RetryDecision::DoNotRetry {
                reason: "failure is not retryable".to_string(),
            },
        }
    }

    /// `2^attempt * base_delay`, saturating.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}
