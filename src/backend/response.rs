//! Response classification and diagnostic dumps.
//!
//! Every response passes through [`classify`] before its body is decoded.
//! Rules, in order:
//!
//! 1. A `Retry-After` header is forwarded to the [`RateLimiter`].
//! 2. 2xx is success.
//! 3. 404 becomes [`BackendError::NotFound`].
//! 4. Anything else becomes [`BackendError::Protocol`].
//!
//! Failures carry a text dump of the request and response. Credential
//! headers are replaced with a fixed placeholder when the request is
//! captured, so the token never reaches the dump. Query strings are
//! dropped from captured URLs for the same reason: upload session URLs
//! carry their credential there.

use std::fmt::Write as _;

use reqwest::header::{AUTHORIZATION, HeaderMap, PROXY_AUTHORIZATION, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use tracing::{debug, warn};

use super::constants::{MAX_DUMP_BODY_BYTES, REDACTED_PLACEHOLDER};
use super::error::{BackendError, ResponseContext};
use super::rate_limiter::{RateLimiter, parse_retry_after};

/// Outcome of status classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 2xx - decode the body.
    Success,
    /// 404 - the object (or upload session) does not exist.
    NotFound,
    /// Any other status.
    Failure,
}

/// Classifies an HTTP status.
#[must_use]
pub fn classify_status(status: StatusCode) -> Classification {
    if status.is_success() {
        Classification::Success
    } else if status == StatusCode::NOT_FOUND {
        Classification::NotFound
    } else {
        Classification::Failure
    }
}

/// Renders `url` for logs and errors with any query string replaced by
/// the redaction placeholder.
#[must_use]
pub(crate) fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?{REDACTED_PLACEHOLDER}"),
        None => url.to_string(),
    }
}

/// Snapshot of an outgoing request, taken before it is sent.
///
/// Header values for `Authorization` and `Proxy-Authorization` are replaced
/// at capture time; the summary never holds the secret.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
}

impl RequestSummary {
    /// Captures method, URL and redacted headers of `request`.
    #[must_use]
    pub fn capture(request: &reqwest::Request) -> Self {
        Self {
            method: request.method().to_string(),
            url: redact_url(request.url().as_str()),
            headers: redacted_headers(request.headers()),
        }
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Returns header name/value pairs with credential values replaced.
fn redacted_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if *name == AUTHORIZATION || *name == PROXY_AUTHORIZATION {
                REDACTED_PLACEHOLDER.to_string()
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name.as_str().to_string(), shown)
        })
        .collect()
}

/// Forwards any rate-limit hint, then checks the status.
///
/// On failure the response body is read (bounded) for the dump.
///
/// # Errors
///
/// Returns [`BackendError::NotFound`] for 404 and [`BackendError::Protocol`]
/// for any other non-success status.
pub async fn classify(
    response: Response,
    request: &RequestSummary,
    limiter: &RateLimiter,
) -> Result<Response, BackendError> {
    if let Some(hint) = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
    {
        limiter.record_hint(hint);
    }

    let status = response.status();
    let classification = classify_status(status);
    if classification == Classification::Success {
        return Ok(response);
    }

    let response_headers = redacted_headers(response.headers());
    let body = match response.text().await {
        Ok(body) => body,
        Err(error) => {
            debug!(error = %error, "could not read error response body");
            String::new()
        }
    };
    let context = build_context(request, status, &response_headers, &body);

    if classification == Classification::NotFound {
        debug!(url = %context.url, "object not found");
        Err(BackendError::not_found(context))
    } else {
        warn!(
            url = %context.url,
            status = context.status,
            "backend request failed"
        );
        Err(BackendError::protocol(context))
    }
}

/// Assembles the redacted failure context.
pub(crate) fn build_context(
    request: &RequestSummary,
    status: StatusCode,
    response_headers: &[(String, String)],
    body: &str,
) -> ResponseContext {
    let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
    ResponseContext {
        method: request.method.clone(),
        url: request.url.clone(),
        status: status.as_u16(),
        reason: reason.clone(),
        dump: render_dump(request, status.as_u16(), &reason, response_headers, body),
    }
}

fn render_dump(
    request: &RequestSummary,
    status: u16,
    reason: &str,
    response_headers: &[(String, String)],
    body: &str,
) -> String {
    let mut dump = String::new();
    let _ = writeln!(dump, "> {} {}", request.method, request.url);
    for (name, value) in &request.headers {
        let _ = writeln!(dump, "> {name}: {value}");
    }
    let _ = writeln!(dump, "< {status} {reason}");
    for (name, value) in response_headers {
        let _ = writeln!(dump, "< {name}: {value}");
    }
    if !body.is_empty() {
        dump.push('\n');
        dump.push_str(truncate_on_char_boundary(body, MAX_DUMP_BODY_BYTES));
    }
    dump
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TOKEN: &str = "EwBwA8l6BAAU-super-secret-token";

    fn request_with_auth() -> reqwest::Request {
        reqwest::Client::new()
            .get("https://graph.microsoft.com/v1.0/me/drive/root:/backup")
            .header(AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header("x-request-tag", "abc")
            .build()
            .unwrap()
    }

    // ==================== classify_status Tests ====================

    #[test]
    fn test_classify_status_success_range() {
        for code in [200, 201, 202, 204] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_status(status), Classification::Success);
        }
    }

    #[test]
    fn test_classify_status_not_found() {
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            Classification::NotFound
        );
    }

    #[test]
    fn test_classify_status_failures() {
        for code in [400, 401, 403, 409, 429, 500, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_status(status), Classification::Failure);
        }
    }

    // ==================== Redaction Tests ====================

    #[test]
    fn test_request_summary_redacts_authorization() {
        let summary = RequestSummary::capture(&request_with_auth());
        let debug = format!("{summary:?}");
        assert!(!debug.contains(TOKEN), "token leaked: {debug}");
        assert!(debug.contains(REDACTED_PLACEHOLDER));
    }

    #[test]
    fn test_dump_never_contains_token() {
        let summary = RequestSummary::capture(&request_with_auth());
        let context = build_context(
            &summary,
            StatusCode::INTERNAL_SERVER_ERROR,
            &[("content-type".to_string(), "application/json".to_string())],
            r#"{"error":{"code":"generalException"}}"#,
        );

        assert!(!context.dump.contains(TOKEN), "token leaked: {}", context.dump);
        assert!(context.dump.contains("authorization: [REDACTED]"));
        assert!(context.dump.contains("x-request-tag: abc"));
        assert!(context.dump.contains("< 500 Internal Server Error"));
        assert!(context.dump.contains("generalException"));
        assert_eq!(context.reason, "Internal Server Error");
    }

    #[test]
    fn test_proxy_authorization_redacted() {
        let request = reqwest::Client::new()
            .get("https://graph.microsoft.com/v1.0/me/drive")
            .header(PROXY_AUTHORIZATION, "Basic dXNlcjpodW50ZXIy")
            .build()
            .unwrap();
        let summary = RequestSummary::capture(&request);
        let context = build_context(&summary, StatusCode::BAD_GATEWAY, &[], "");
        assert!(!context.dump.contains("dXNlcjpodW50ZXIy"));
    }

    #[test]
    fn test_upload_url_query_is_redacted() {
        let request = reqwest::Client::new()
            .put("https://my.microsoftpersonalcontent.com/up/fe6987415ace7X4e1eF866337?tempauth=secret-tempauth")
            .build()
            .unwrap();
        let summary = RequestSummary::capture(&request);
        let context = build_context(&summary, StatusCode::BAD_REQUEST, &[], "");

        assert!(!summary.url().contains("secret-tempauth"));
        assert_eq!(
            summary.url(),
            "https://my.microsoftpersonalcontent.com/up/fe6987415ace7X4e1eF866337?[REDACTED]"
        );
        assert!(!context.dump.contains("secret-tempauth"), "leaked: {}", context.dump);
        assert!(!context.url.contains("secret-tempauth"));
        assert!(context.dump.contains(REDACTED_PLACEHOLDER));
    }

    #[test]
    fn test_redact_url_keeps_plain_urls() {
        let url = "https://graph.microsoft.com/v1.0/me/drive/root:/a%20b";
        assert_eq!(redact_url(url), url);
        assert_eq!(redact_url("https://up.example/s/1?a=b#c"), "https://up.example/s/1?[REDACTED]");
    }

    #[test]
    fn test_dump_body_is_truncated() {
        let summary = RequestSummary::capture(&request_with_auth());
        let body = "é".repeat(MAX_DUMP_BODY_BYTES);
        let context = build_context(&summary, StatusCode::BAD_REQUEST, &[], &body);
        assert!(context.dump.len() < MAX_DUMP_BODY_BYTES + 512);
    }

    #[test]
    fn test_truncate_on_char_boundary_keeps_short_text() {
        assert_eq!(truncate_on_char_boundary("abc", 10), "abc");
        assert_eq!(truncate_on_char_boundary("aé", 2), "a");
    }
}
