//! Microsoft Graph drive backend.
//!
//! This module moves backup volumes to and from a OneDrive / SharePoint
//! drive over the Graph REST API.
//!
//! # Features
//!
//! - Lazy, paged listing of the backend root
//! - Streaming fetch to any `AsyncWrite`
//! - Single-shot PUT for small payloads, resumable upload sessions for
//!   large ones (sequential fragments, per-fragment retry, session abort)
//! - Server-driven throttling from `Retry-After` hints
//! - Typed errors with credential-redacted request/response dumps
//! - Cancellation through a `CancellationToken` on every network wait
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use graphdrive_core::backend::{GraphBackend, UploadStream};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), graphdrive_core::backend::BackendError> {
//! let options = HashMap::from([("authid".to_string(), "token".to_string())]);
//! let backend = GraphBackend::new("onedrivev2://backups/laptop", &options)?;
//!
//! let cancel = CancellationToken::new();
//! let stream = UploadStream::from_bytes(b"volume bytes".to_vec());
//! backend.store("vol-1.zip", stream, &cancel).await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod client;
mod config;
mod constants;
mod error;
mod model;
mod path;
pub mod rate_limiter;
mod response;
mod retry;
mod source;
mod transport;
pub mod types;
mod upload;

pub use auth::{CredentialSupplier, StaticBearer};
pub use client::GraphBackend;
pub use config::{BackendOptions, DriveTarget, OptionDescriptor};
pub use constants::{
    DEFAULT_FRAGMENT_RETRY_COUNT, DEFAULT_FRAGMENT_RETRY_DELAY_MS, DEFAULT_FRAGMENT_SIZE,
    FRAGMENT_MAX_SIZE, FRAGMENT_MULTIPLE_SIZE, SINGLE_SHOT_MAX_SIZE,
};
pub use error::{BackendError, ResponseContext, SessionContext};
pub use model::{QuotaInfo, RemoteFile};
pub use path::{encode_path, normalize_slashes, resolve_root, root_from_url};
pub use rate_limiter::{RateLimiter, RetryHint, parse_retry_after};
pub use response::{Classification, RequestSummary, classify, classify_status};
pub use retry::{FailureType, FragmentRetryPolicy, RetryDecision, classify_failure};
pub use source::{FragmentView, RewindError, SeekableReader, UploadStream};
pub use transport::{HttpTransport, Transport};
pub use upload::{Fragment, FragmentPlan, fragment_size_for};

// No module-local Result alias; signatures spell out `Result<T, BackendError>`.
