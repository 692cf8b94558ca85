//! Upload Session Manager.
//!
//! Payloads below [`SINGLE_SHOT_MAX_SIZE`] go out as one PUT. Anything
//! larger is sent through an upload session:
//!
//! ```text
//! START -> SESSION_CREATE -> FRAGMENT_LOOP -> DONE
//!                            FRAGMENT_LOOP -> RETRY_FRAGMENT -> FRAGMENT_LOOP
//!                            FRAGMENT_LOOP -> ABORT_SESSION  -> FAILED
//! ```
//!
//! Fragments are sent strictly in offset order, one at a time. Each attempt
//! waits on the rate limiter; failed attempts are rewound and then handed
//! to the [`FragmentRetryPolicy`]. Unrecoverable failures cancel the
//! session with a best-effort DELETE and surface as
//! [`BackendError::FragmentUpload`]. Cancellation skips the DELETE.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::{Auth, GraphBackend, decode_json};
use super::constants::{FRAGMENT_MAX_SIZE, FRAGMENT_MULTIPLE_SIZE, SINGLE_SHOT_MAX_SIZE};
use super::error::{BackendError, SessionContext};
use super::response::redact_url;
use super::retry::{FragmentRetryPolicy, RetryDecision, classify_failure};
use super::source::{FragmentView, RewindError, UploadStream};
use super::types::{DriveItem, UploadSession};

/// Clamps a configured fragment size to the service limits and aligns it
/// down to a multiple of 320 KiB.
///
/// ```
/// use graphdrive_core::backend::fragment_size_for;
///
/// assert_eq!(fragment_size_for(10 * 1024 * 1024), 10 * 1024 * 1024);
/// assert_eq!(fragment_size_for(1), 320 * 1024);
/// assert_eq!(fragment_size_for(700 * 1024), 640 * 1024);
/// ```
#[must_use]
pub fn fragment_size_for(configured: u64) -> u64 {
    let clamped = configured.clamp(FRAGMENT_MULTIPLE_SIZE, FRAGMENT_MAX_SIZE);
    clamped / FRAGMENT_MULTIPLE_SIZE * FRAGMENT_MULTIPLE_SIZE
}

/// One byte range of a fragmented upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Zero-based position in the upload.
    pub index: u64,
    /// First byte.
    pub offset: u64,
    /// Number of bytes.
    pub len: u64,
}

impl Fragment {
    /// Last byte, inclusive.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.len.saturating_sub(1)
    }

    /// `Content-Range` header value for this fragment of `total` bytes.
    #[must_use]
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.offset, self.end())
    }
}

/// Partition of `[0, total)` into consecutive fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentPlan {
    total: u64,
    fragment_size: u64,
}

impl FragmentPlan {
    /// Plans `total` bytes in fragments of `fragment_size` (at least 1).
    #[must_use]
    pub fn new(total: u64, fragment_size: u64) -> Self {
        Self {
            total,
            fragment_size: fragment_size.max(1),
        }
    }

    /// Number of fragments.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.total.div_ceil(self.fragment_size)
    }

    /// Total payload size.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Fragments in increasing offset order; the last one holds the remainder.
    pub fn fragments(&self) -> impl Iterator<Item = Fragment> + '_ {
        (0..self.count()).map(move |index| {
            let offset = index * self.fragment_size;
            Fragment {
                index,
                offset,
                len: self.fragment_size.min(self.total - offset),
            }
        })
    }
}

impl GraphBackend {
    /// Uploads `stream` to the item at `item_path`, choosing single shot or
    /// an upload session by size.
    pub(crate) async fn upload(
        &self,
        item_path: &str,
        stream: UploadStream,
        cancel: &CancellationToken,
    ) -> Result<DriveItem, BackendError> {
        if stream.len() < SINGLE_SHOT_MAX_SIZE {
            self.upload_single_shot(item_path, stream, cancel).await
        } else {
            self.upload_in_session(item_path, stream, cancel).await
        }
    }

    #[instrument(skip(self, stream, cancel), fields(len = stream.len()))]
    async fn upload_single_shot(
        &self,
        item_path: &str,
        stream: UploadStream,
        cancel: &CancellationToken,
    ) -> Result<DriveItem, BackendError> {
        let url = self.drive_url(&format!("/root:{item_path}:/content"));
        let len = stream.len();
        let view = FragmentView::new(Arc::new(Mutex::new(stream)), 0, len);

        let builder = self
            .transport()
            .request(Method::PUT, &url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, len)
            .body(view.body().await);
        let result = self.send(builder, Auth::Bearer, cancel).await;
        let response = match result {
            Ok(response) => response,
            Err(error) => return Err(read_error_or(&view, error)),
        };
        debug!("single-shot upload accepted");
        decode_json(response).await
    }

    #[instrument(skip(self, stream, cancel), fields(len = stream.len()))]
    async fn upload_in_session(
        &self,
        item_path: &str,
        stream: UploadStream,
        cancel: &CancellationToken,
    ) -> Result<DriveItem, BackendError> {
        let create_url = self.drive_url(&format!("/root:{item_path}:/createUploadSession"));
        let session: UploadSession = self
            .send_json(Method::POST, &create_url, None::<&()>, cancel)
            .await?;
        let upload_url = session
            .upload_url
            .ok_or_else(|| BackendError::unexpected(&create_url, "upload session has no uploadUrl"))?;
        let context = SessionContext {
            create_url,
            upload_url,
        };

        let plan = FragmentPlan::new(stream.len(), fragment_size_for(self.options().fragment_size));
        let policy = FragmentRetryPolicy::new(
            self.options().fragment_retry_count,
            self.options().fragment_retry_delay,
        );
        debug!(
            fragments = plan.count(),
            expires_at = ?session.expires_at,
            "upload session created"
        );

        let source = Arc::new(Mutex::new(stream));
        let mut finished = None;
        for fragment in plan.fragments() {
            let view = FragmentView::new(Arc::clone(&source), fragment.offset, fragment.len);
            let last = fragment.index + 1 == plan.count();
            finished = self
                .upload_fragment(&context, &plan, fragment, &view, &policy, last, cancel)
                .await?;
        }

        let item = finished.ok_or_else(|| {
            BackendError::unexpected(redact_url(&context.upload_url), "final fragment returned no item")
        })?;
        info!(fragments = plan.count(), bytes = plan.total(), "fragmented upload complete");
        Ok(item)
    }

    /// Sends one fragment, retrying per policy. Returns the finished item
    /// for the last fragment.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(fragment = fragment.index, offset = fragment.offset, len = fragment.len))]
    async fn upload_fragment(
        &self,
        context: &SessionContext,
        plan: &FragmentPlan,
        fragment: Fragment,
        view: &FragmentView,
        policy: &FragmentRetryPolicy,
        last: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<DriveItem>, BackendError> {
        let mut attempt = 0u32;
        loop {
            let error = match self.put_fragment(context, plan, fragment, view, cancel).await {
                Ok(response) => {
                    if last {
                        return decode_json::<DriveItem>(response).await.map(Some);
                    }
                    let status: UploadSession = decode_json(response).await?;
                    debug!(next_expected = ?status.next_expected_ranges, "fragment accepted");
                    return Ok(None);
                }
                Err(BackendError::Cancelled) => return Err(BackendError::Cancelled),
                Err(error) => read_error_or(view, error),
            };

            if let Err(rewind) = view.rewind().await {
                warn!(?rewind, "fragment cannot be rewound, upload must restart");
                self.abort_session(&context.upload_url, cancel).await?;
                let error = match rewind {
                    RewindError::Seek(io) => BackendError::io("rewinding upload source", io),
                    RewindError::NotSeekable { .. } => error,
                };
                return Err(fragment_error(plan, fragment, context, true, error));
            }

            match policy.should_retry(classify_failure(&error), attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    warn!(
                        error = %error,
                        attempt = next + 1,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        "retrying fragment"
                    );
                    sleep_cancellable(delay, cancel).await?;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(error = %error, reason, "aborting upload session");
                    self.abort_session(&context.upload_url, cancel).await?;
                    return Err(fragment_error(plan, fragment, context, false, error));
                }
            }
        }
    }

    async fn put_fragment(
        &self,
        context: &SessionContext,
        plan: &FragmentPlan,
        fragment: Fragment,
        view: &FragmentView,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, BackendError> {
        let builder = self
            .transport()
            .request(Method::PUT, &context.upload_url)
            .header(CONTENT_LENGTH, fragment.len)
            .header(CONTENT_RANGE, fragment.content_range(plan.total()))
            .body(view.body().await);
        self.send(builder, Auth::None, cancel).await
    }

    /// Cancels the session on the server. A failed DELETE is only logged;
    /// cancellation while it waits or runs skips the cleanup and is returned.
    async fn abort_session(
        &self,
        upload_url: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        let builder = self.transport().request(Method::DELETE, upload_url);
        match self.send(builder, Auth::None, cancel).await {
            Ok(_) => debug!("upload session cancelled"),
            Err(BackendError::Cancelled) => {
                debug!("upload session cancel skipped");
                return Err(BackendError::Cancelled);
            }
            Err(error) => warn!(error = %error, "ignoring failed upload session cancel"),
        }
        Ok(())
    }
}

fn fragment_error(
    plan: &FragmentPlan,
    fragment: Fragment,
    context: &SessionContext,
    restart_required: bool,
    source: BackendError,
) -> BackendError {
    let session = SessionContext {
        create_url: context.create_url.clone(),
        upload_url: redact_url(&context.upload_url),
    };
    BackendError::fragment_upload(
        fragment.index,
        plan.count(),
        session,
        restart_required,
        source,
    )
}

/// Prefers the local read failure recorded by the view over the transport
/// error it caused.
fn read_error_or(view: &FragmentView, error: BackendError) -> BackendError {
    match view.take_read_error() {
        Some(io) => BackendError::io("reading upload source", io),
        None => error,
    }
}

async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> Result<(), BackendError> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        () = cancel.cancelled() => Err(BackendError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
