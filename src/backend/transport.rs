//! HTTP transport seam.
//!
//! [`Transport`] is the one place requests leave the process. The client
//! builds requests through it and executes them through it, so tests and
//! embedders can swap the wire layer without touching protocol code.
//! [`HttpTransport`] is the only concrete implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Request, RequestBuilder, Response};
use tracing::debug;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::BackendError;
use crate::user_agent;

/// Sends HTTP requests on behalf of the backend client.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Starts a request with the given verb (`GET`, `PUT`, `POST`, `PATCH`, `DELETE`).
    fn request(&self, method: Method, url: &str) -> RequestBuilder;

    /// Sends a built request and returns the response head; the body is
    /// streamed by the caller.
    async fn execute(&self, request: Request) -> Result<Response, reqwest::Error>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Builds a transport with the default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] if the TLS backend or system
    /// configuration prevents building the client.
    pub fn new() -> Result<Self, BackendError> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Builds a transport with custom timeouts.
    ///
    /// The read timeout applies between reads of a body, not to the whole
    /// request, so large fragments are not cut off.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] if the client cannot be built.
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(|e| BackendError::config("transport", e.to_string()))?;
        debug!(connect_timeout_secs, read_timeout_secs, "HTTP transport ready");
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    async fn execute(&self, request: Request) -> Result<Response, reqwest::Error> {
        self.client.execute(request).await
    }
}
