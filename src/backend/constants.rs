//! Constants for the backend module (timeouts, protocol size limits, defaults).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes between reads, not per request).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Default Graph endpoint.
pub const DEFAULT_BASE_ADDRESS: &str = "https://graph.microsoft.com";

/// API version fragment prefixed to every Graph path.
pub const API_VERSION: &str = "/v1.0";

/// Largest payload sent as a single PUT. Anything at or above this goes
/// through an upload session.
pub const SINGLE_SHOT_MAX_SIZE: u64 = 4 * 1000 * 1000;

/// Fragments must be a multiple of 320 KiB.
pub const FRAGMENT_MULTIPLE_SIZE: u64 = 320 * 1024;

/// Upper bound for a single fragment (60 MiB).
pub const FRAGMENT_MAX_SIZE: u64 = 60 * 1024 * 1024;

/// Default fragment size (10 MiB, an exact multiple of 320 KiB).
pub const DEFAULT_FRAGMENT_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of attempts per fragment.
pub const DEFAULT_FRAGMENT_RETRY_COUNT: u32 = 5;

/// Default backoff base delay for fragment retries, in milliseconds.
pub const DEFAULT_FRAGMENT_RETRY_DELAY_MS: u64 = 500;

/// Chunk size used when streaming a fragment body from its source.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound on response body bytes kept in a diagnostic dump.
pub const MAX_DUMP_BODY_BYTES: usize = 4 * 1024;

/// Placeholder substituted for credential header values in diagnostics.
pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";
