//! Error types for the backend module.
//!
//! Every failure a backend operation can surface is a [`BackendError`]
//! variant. HTTP failures carry a [`ResponseContext`] whose diagnostic dump
//! has already had credentials redacted, so errors are safe to log and show.

use thiserror::Error;

/// Request/response context captured when the server rejects a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseContext {
    /// HTTP method of the offending request.
    pub method: String,
    /// Request URL.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase for the status code.
    pub reason: String,
    /// Request and response dump with credential headers redacted.
    pub dump: String,
}

/// Upload session identity attached to fragment failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// URL the session was created through.
    pub create_url: String,
    /// Server-issued fragment endpoint.
    pub upload_url: String,
}

/// Errors that can occur during backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The server answered 404 for the requested object.
    #[error("object not found: {} {}", .context.method, .context.url)]
    NotFound {
        /// Redacted request/response context.
        context: Box<ResponseContext>,
    },

    /// Any other non-success HTTP status.
    #[error(
        "HTTP {} {} for {} {}",
        .context.status,
        .context.reason,
        .context.method,
        .context.url
    )]
    Protocol {
        /// Redacted request/response context.
        context: Box<ResponseContext>,
    },

    /// A fragmented upload failed irrecoverably.
    #[error(
        "upload of fragment {} of {fragment_count} failed for session {}: {source}",
        .fragment + 1,
        .session.create_url
    )]
    FragmentUpload {
        /// Zero-based index of the failing fragment.
        fragment: u64,
        /// Total number of fragments in the upload.
        fragment_count: u64,
        /// Session the fragment belonged to.
        session: Box<SessionContext>,
        /// The source stream cannot be rewound; the whole file must be restarted.
        restart_required: bool,
        /// The classified failure of the last attempt.
        #[source]
        source: Box<BackendError>,
    },

    /// The remote file does not exist.
    #[error("file missing: {name}")]
    FileMissing {
        /// Root-relative file name.
        name: String,
        /// Underlying not-found error.
        #[source]
        source: Box<BackendError>,
    },

    /// The backend root folder does not exist.
    #[error("folder missing: {path}")]
    FolderMissing {
        /// Resolved root path.
        path: String,
        /// Underlying not-found error.
        #[source]
        source: Box<BackendError>,
    },

    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error for {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout for {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Response body was not the expected JSON.
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        /// The URL whose response failed to decode.
        url: String,
        /// The underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Response decoded but lacks something the protocol requires.
    #[error("unexpected response from {url}: {message}")]
    UnexpectedResponse {
        /// The URL that produced the response.
        url: String,
        /// What was missing or wrong.
        message: String,
    },

    /// Local I/O error while reading a source or writing a destination.
    #[error("IO error {context}: {source}")]
    Io {
        /// What was being done when the error occurred.
        context: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A backend option is missing or inconsistent.
    #[error("invalid option `{option}`: {message}")]
    Config {
        /// Option key.
        option: String,
        /// What is wrong with it.
        message: String,
    },

    /// The credential supplier could not produce a bearer token.
    #[error("credential unavailable: {message}")]
    Credential {
        /// Description without secret material.
        message: String,
    },

    /// The operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl BackendError {
    /// Creates a not-found error.
    pub fn not_found(context: ResponseContext) -> Self {
        Self::NotFound {
            context: Box::new(context),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(context: ResponseContext) -> Self {
        Self::Protocol {
            context: Box::new(context),
        }
    }

    /// Creates a fragment upload error wrapping the last attempt's failure.
    pub fn fragment_upload(
        fragment: u64,
        fragment_count: u64,
        session: SessionContext,
        restart_required: bool,
        source: BackendError,
    ) -> Self {
        Self::FragmentUpload {
            fragment,
            fragment_count,
            session: Box::new(session),
            restart_required,
            source: Box::new(source),
        }
    }

    /// Wraps an error as "file missing".
    pub fn file_missing(name: impl Into<String>, source: BackendError) -> Self {
        Self::FileMissing {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Wraps an error as "folder missing".
    pub fn folder_missing(path: impl Into<String>, source: BackendError) -> Self {
        Self::FolderMissing {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }

    /// Creates an unexpected-response error.
    pub fn unexpected(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a configuration error.
    pub fn config(option: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            option: option.into(),
            message: message.into(),
        }
    }

    /// HTTP status of the failure, looking through domain wrappers.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { context } | Self::Protocol { context } => Some(context.status),
            Self::FragmentUpload { source, .. }
            | Self::FileMissing { source, .. }
            | Self::FolderMissing { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Redacted request/response context, if this is an HTTP failure.
    #[must_use]
    pub fn response_context(&self) -> Option<&ResponseContext> {
        match self {
            Self::NotFound { context } | Self::Protocol { context } => Some(context),
            Self::FragmentUpload { source, .. }
            | Self::FileMissing { source, .. }
            | Self::FolderMissing { source, .. } => source.response_context(),
            _ => None,
        }
    }

    /// True for not-found and the domain errors derived from it.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::FileMissing { .. } | Self::FolderMissing { .. }
        )
    }

    /// True if the operation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs a
// URL or context string the source error does not carry.
