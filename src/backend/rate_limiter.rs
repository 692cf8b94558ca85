//! Server-driven request throttling.
//!
//! This module provides the [`RateLimiter`] struct, which tracks the earliest
//! instant the next request to the backend may be sent. The deadline only
//! ever moves forward: it is pushed out whenever a response carries a
//! `Retry-After` hint, and every request waits on it before going out.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use graphdrive_core::backend::{RateLimiter, RetryHint};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), graphdrive_core::backend::BackendError> {
//! let limiter = RateLimiter::new();
//! let cancel = CancellationToken::new();
//!
//! // No hint recorded yet - proceeds immediately
//! limiter.wait_if_needed(&cancel).await?;
//!
//! // Server asked us to back off
//! limiter.record_hint(RetryHint::After(Duration::from_millis(50)));
//! limiter.wait_if_needed(&cancel).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::constants::MAX_RETRY_AFTER;
use super::error::BackendError;

/// A server-supplied rate-limit hint, per RFC 7231 `Retry-After` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Wait this long from now.
    After(Duration),
    /// Wait until this wall-clock time.
    At(SystemTime),
}

impl RetryHint {
    /// Converts the hint into a delay measured from now, capped at one hour.
    #[must_use]
    pub fn delay_from_now(self) -> Duration {
        let delay = match self {
            Self::After(delay) => delay,
            Self::At(at) => at
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO),
        };
        if delay > MAX_RETRY_AFTER {
            warn!(
                delay_secs = delay.as_secs(),
                max_secs = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            MAX_RETRY_AFTER
        } else {
            delay
        }
    }
}

/// Per-client request throttle.
///
/// The deadline is stored as microseconds past a fixed origin in an
/// [`AtomicU64`] and advanced with `fetch_max`, so concurrent recorders
/// never move it backwards and readers never see a torn value.
///
/// # Thread Safety
///
/// `RateLimiter` is `Send + Sync`; share it behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    /// Reference point for the stored offset.
    origin: Instant,

    /// Earliest allowed send time, as microseconds past `origin`.
    next_allowed_micros: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Creates a limiter that allows the first request immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            next_allowed_micros: AtomicU64::new(0),
        }
    }

    /// Returns how long a request issued now would have to wait.
    #[must_use]
    pub fn next_allowed_in(&self) -> Duration {
        let deadline = self.deadline();
        deadline.saturating_duration_since(Instant::now())
    }

    /// Earliest instant the next request may be sent.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        let micros = self.next_allowed_micros.load(Ordering::SeqCst);
        self.origin + Duration::from_micros(micros)
    }

    /// Records a server hint. The deadline only moves if the hint ends later
    /// than the current deadline.
    #[instrument(skip(self))]
    pub fn record_hint(&self, hint: RetryHint) {
        self.record_delay(hint.delay_from_now());
    }

    /// Pushes the deadline to `now + delay` unless it is already later.
    pub fn record_delay(&self, delay: Duration) {
        let target = Instant::now() + delay;
        let offset = target.saturating_duration_since(self.origin);
        let micros = u64::try_from(offset.as_micros()).unwrap_or(u64::MAX);
        let previous = self.next_allowed_micros.fetch_max(micros, Ordering::SeqCst);

        if micros > previous {
            debug!(delay_ms = delay.as_millis(), "recorded server rate limit");
        } else {
            debug!(
                delay_ms = delay.as_millis(),
                "rate limit hint earlier than current deadline, ignoring"
            );
        }
    }

    /// Waits until the deadline has passed.
    ///
    /// Re-checks after each sleep, since another response may have pushed
    /// the deadline out in the meantime.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Cancelled`] if `cancel` fires while waiting.
    pub async fn wait_if_needed(&self, cancel: &CancellationToken) -> Result<(), BackendError> {
        loop {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            let deadline = self.deadline();
            if Instant::now() >= deadline {
                return Ok(());
            }

            debug!(
                wait_ms = deadline.saturating_duration_since(Instant::now()).as_millis(),
                "waiting for rate limit"
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(BackendError::Cancelled),
                () = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Blocking form of [`wait_if_needed`](Self::wait_if_needed) for callers
    /// outside an async context. Must not be called from a runtime worker.
    pub fn block_until_allowed(&self) {
        loop {
            let remaining = self.next_allowed_in();
            if remaining.is_zero() {
                return;
            }
            std::thread::sleep(remaining);
        }
    }
}

/// Parses a Retry-After header value into a [`RetryHint`].
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use graphdrive_core::backend::{RetryHint, parse_retry_after};
///
/// assert_eq!(parse_retry_after("120"), Some(RetryHint::After(Duration::from_secs(120))));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<RetryHint> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        return Some(RetryHint::After(Duration::from_secs(seconds as u64)));
    }

    if let Ok(at) = httpdate::parse_http_date(header_value) {
        Some(RetryHint::At(at))
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}
