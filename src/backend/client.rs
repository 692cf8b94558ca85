//! Backend protocol client.
//!
//! [`GraphBackend`] is the operation surface the backup engine talks to.
//! Every operation funnels through one primitive, `send`:
//!
//! 1. wait on the [`RateLimiter`] (cancellable)
//! 2. attach the bearer credential unless the request goes to a
//!    pre-authenticated upload URL
//! 3. capture a redacted [`RequestSummary`]
//! 4. execute through the [`Transport`], racing the cancellation token
//! 5. [`classify`] the response
//!
//! Bodies are then decoded with `decode_json`, which reads an empty body
//! as `{}`.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use futures_util::TryStreamExt;
//! use graphdrive_core::backend::GraphBackend;
//!
//! # async fn example() -> Result<(), graphdrive_core::backend::BackendError> {
//! let options = HashMap::from([("authid".to_string(), "token".to_string())]);
//! let backend = GraphBackend::new("onedrivev2://backups/laptop", &options)?;
//!
//! let files: Vec<_> = backend.list().try_collect().await?;
//! for file in files {
//!     println!("{} {}", file.name, file.size);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use futures_util::{Stream, StreamExt, TryStreamExt, stream};
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::auth::{CredentialSupplier, StaticBearer};
use super::config::BackendOptions;
use super::error::BackendError;
use super::model::{QuotaInfo, RemoteFile};
use super::path::{encode_path, item_path, leaf_name, relative_name, root_from_url};
use super::rate_limiter::RateLimiter;
use super::response::{RequestSummary, classify, redact_url};
use super::source::UploadStream;
use super::transport::{HttpTransport, Transport};
use super::types::{Drive, DriveItem, FolderFacet, GraphCollection, NewFolder, RenameItem, UploadSession};

/// Whether a request carries the bearer credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Auth {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// Pre-authenticated upload URLs reject credentials.
    None,
}

/// Client for one backend root on one drive.
///
/// One logical transfer at a time per instance; the rate limiter and the
/// cached root and endpoint results are the only shared state.
#[derive(Debug)]
pub struct GraphBackend {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialSupplier>,
    limiter: Arc<RateLimiter>,
    options: BackendOptions,
    connection_url: Url,
    root: OnceLock<String>,
    endpoints: OnceCell<Vec<String>>,
    shutdown: CancellationToken,
}

impl GraphBackend {
    /// Creates a backend from a connection URL and the flat option map,
    /// using [`HttpTransport`] and the `authid` option as a static bearer.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidUrl`] for an unparseable connection
    /// URL and [`BackendError::Config`] for invalid options.
    pub fn new(
        connection_url: &str,
        options: &HashMap<String, String>,
    ) -> Result<Self, BackendError> {
        let options = BackendOptions::from_map(options)?;
        let credentials = Arc::new(StaticBearer::new(options.auth_id.clone()));
        let transport = Arc::new(HttpTransport::new()?);
        Self::with_parts(connection_url, options, transport, credentials)
    }

    /// Creates a backend with an injected transport and credential supplier.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidUrl`] if `connection_url` does not parse.
    pub fn with_parts(
        connection_url: &str,
        options: BackendOptions,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSupplier>,
    ) -> Result<Self, BackendError> {
        let connection_url =
            Url::parse(connection_url).map_err(|_| BackendError::invalid_url(connection_url))?;
        Ok(Self {
            transport,
            credentials,
            limiter: Arc::new(RateLimiter::new()),
            options,
            connection_url,
            root: OnceLock::new(),
            endpoints: OnceCell::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Resolved root path, computed once from the connection URL.
    #[must_use]
    pub fn root(&self) -> &str {
        self.root.get_or_init(|| root_from_url(&self.connection_url))
    }

    /// Parsed options.
    #[must_use]
    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    /// Shared request throttle.
    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Token that cancels every operation not given its own token.
    /// [`dispose`](Self::dispose) cancels it.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Absolute URL under the configured drive.
    pub(crate) fn drive_url(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.options.drive_url())
    }

    fn root_item_url(&self) -> String {
        let root = self.root();
        if root.is_empty() {
            self.drive_url("/root")
        } else {
            self.drive_url(&format!("/root:{}", encode_path(root)))
        }
    }

    fn children_url(&self) -> String {
        let root = self.root();
        if root.is_empty() {
            self.drive_url("/root/children")
        } else {
            self.drive_url(&format!("/root:{}:/children", encode_path(root)))
        }
    }

    fn item_url(&self, name: &str) -> String {
        self.drive_url(&format!("/root:{}", item_path(self.root(), name)))
    }

    /// Sends one request: rate limit, credential, execute, classify.
    pub(crate) async fn send(
        &self,
        builder: RequestBuilder,
        auth: Auth,
        cancel: &CancellationToken,
    ) -> Result<Response, BackendError> {
        tokio::select! {
            () = self.shutdown.cancelled() => return Err(BackendError::Cancelled),
            waited = self.limiter.wait_if_needed(cancel) => waited?,
        }

        let builder = match auth {
            Auth::Bearer => builder.bearer_auth(self.credentials.bearer_token().await?),
            Auth::None => builder,
        };
        let request = builder.build().map_err(|e| {
            let url = e.url().map(|url| redact_url(url.as_str())).unwrap_or_default();
            BackendError::transport(url, e.without_url())
        })?;
        let summary = RequestSummary::capture(&request);
        debug!(method = summary.method(), url = summary.url(), "sending request");

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(BackendError::Cancelled),
            () = self.shutdown.cancelled() => return Err(BackendError::Cancelled),
            result = self.transport.execute(request) => {
                result.map_err(|e| BackendError::transport(summary.url(), e.without_url()))?
            }
        };

        classify(response, &summary, &self.limiter).await
    }

    /// Sends an authenticated request with an optional JSON body and
    /// decodes the JSON response.
    pub(crate) async fn send_json<T, B>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        cancel: &CancellationToken,
    ) -> Result<T, BackendError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut builder = self.transport.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = self.send(builder, Auth::Bearer, cancel).await?;
        decode_json(response).await
    }

    /// Lists the files under the root, following continuation links.
    ///
    /// The stream is lazy: pages are requested as it is polled. Folders and
    /// deleted items are skipped. A missing root yields
    /// [`BackendError::FolderMissing`].
    pub fn list(&self) -> impl Stream<Item = Result<RemoteFile, BackendError>> + '_ {
        stream::try_unfold(Some((self.children_url(), true)), move |state| async move {
            let Some((url, first)) = state else {
                return Ok(None);
            };
            debug!(url = %url, "listing page");

            let page: GraphCollection<DriveItem> = self
                .send_json(Method::GET, &url, None::<&()>, &self.shutdown)
                .await
                .map_err(|e| {
                    if first && e.is_not_found() {
                        BackendError::folder_missing(self.root(), e)
                    } else {
                        e
                    }
                })?;

            let files: Vec<Result<RemoteFile, BackendError>> = page
                .value
                .iter()
                .filter(|item| item.is_live_file())
                .map(|item| Ok(RemoteFile::from_item(item)))
                .collect();
            let next = page.next_link.map(|link| (link, false));
            Ok(Some((stream::iter(files), next)))
        })
        .try_flatten()
    }

    /// Collects [`list`](Self::list) into a vector.
    ///
    /// # Errors
    ///
    /// Returns the first error the listing produced.
    pub async fn list_all(&self) -> Result<Vec<RemoteFile>, BackendError> {
        self.list().try_collect().await
    }

    /// Streams the content of `name` into `destination` and returns the
    /// number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::FileMissing`] if the object does not exist,
    /// [`BackendError::Io`] if writing fails.
    #[instrument(skip(self, destination))]
    pub async fn fetch<W>(&self, name: &str, destination: &mut W) -> Result<u64, BackendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let url = format!("{}:/content", self.item_url(name));
        let builder = self.transport.request(Method::GET, &url);
        let response = self
            .send(builder, Auth::Bearer, &self.shutdown)
            .await
            .map_err(|e| file_missing_on_not_found(name, e))?;

        let mut body = std::pin::pin!(response.bytes_stream());
        let mut written = 0u64;
        loop {
            let chunk = tokio::select! {
                () = self.shutdown.cancelled() => return Err(BackendError::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| BackendError::transport(&url, e.without_url()))?;
            destination
                .write_all(&chunk)
                .await
                .map_err(|e| BackendError::io(format!("writing {name}"), e))?;
            written += chunk.len() as u64;
        }
        destination
            .flush()
            .await
            .map_err(|e| BackendError::io(format!("flushing {name}"), e))?;

        info!(bytes = written, "fetch complete");
        Ok(written)
    }

    /// Fetches `name` into a local file. A partial file is removed on failure.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch), plus [`BackendError::Io`] if the
    /// file cannot be created.
    pub async fn fetch_to_file(&self, name: &str, path: &Path) -> Result<u64, BackendError> {
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| BackendError::io(format!("creating {}", path.display()), e))?;
        match self.fetch(name, &mut file).await {
            Ok(written) => Ok(written),
            Err(error) => {
                drop(file);
                if let Err(remove_error) = tokio::fs::remove_file(path).await {
                    debug!(error = %remove_error, "could not remove partial file");
                }
                Err(error)
            }
        }
    }

    /// Stores `stream` under `name`, as one PUT or through an upload
    /// session depending on size.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::FragmentUpload`] when a fragmented upload
    /// fails irrecoverably, [`BackendError::Cancelled`] when `cancel`
    /// fires, and any request error otherwise.
    #[instrument(skip(self, stream, cancel), fields(len = stream.len()))]
    pub async fn store(
        &self,
        name: &str,
        stream: UploadStream,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        let path = item_path(self.root(), name);
        let item = self.upload(&path, stream, cancel).await?;
        info!(id = item.id.as_deref().unwrap_or_default(), "store complete");
        Ok(())
    }

    /// Stores a local file under `name`.
    ///
    /// # Errors
    ///
    /// Same as [`store`](Self::store), plus [`BackendError::Io`] if the
    /// file cannot be opened.
    pub async fn store_file(
        &self,
        name: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        let stream = UploadStream::open_file(path).await?;
        self.store(name, stream, cancel).await
    }

    /// Deletes `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::FileMissing`] if the object does not exist.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<(), BackendError> {
        let builder = self.transport.request(Method::DELETE, &self.item_url(name));
        self.send(builder, Auth::Bearer, &self.shutdown)
            .await
            .map_err(|e| file_missing_on_not_found(name, e))?;
        info!("delete complete");
        Ok(())
    }

    /// Renames `old_name` to `new_name` within the root.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::FileMissing`] if `old_name` does not exist.
    #[instrument(skip(self))]
    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<(), BackendError> {
        let new_name = leaf_name(new_name);
        let _: DriveItem = self
            .send_json(
                Method::PATCH,
                &self.item_url(old_name),
                Some(&RenameItem { name: &new_name }),
                &self.shutdown,
            )
            .await
            .map_err(|e| file_missing_on_not_found(old_name, e))?;
        info!("rename complete");
        Ok(())
    }

    /// Creates every missing folder along the root path.
    ///
    /// Existing components are looked up and reused, so this is safe to
    /// call when the root already exists.
    ///
    /// # Errors
    ///
    /// Returns any request error other than not-found on lookup, and
    /// [`BackendError::UnexpectedResponse`] if a folder has no id.
    #[instrument(skip(self), fields(root = %self.root()))]
    pub async fn create_folder(&self) -> Result<(), BackendError> {
        let mut parent_id = "root".to_string();
        let mut current = String::new();

        for component in self.root().split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            let lookup_url = self.drive_url(&format!("/root:{}", encode_path(&current)));

            let folder: DriveItem = match self
                .send_json(Method::GET, &lookup_url, None::<&()>, &self.shutdown)
                .await
            {
                Ok(item) => item,
                Err(e) if e.is_not_found() => {
                    debug!(folder = %current, "creating folder");
                    let create_url = self.drive_url(&format!(
                        "/items/{}/children",
                        urlencoding::encode(&parent_id)
                    ));
                    let body = NewFolder {
                        name: component,
                        folder: FolderFacet::default(),
                    };
                    self.send_json(Method::POST, &create_url, Some(&body), &self.shutdown)
                        .await?
                }
                Err(e) => return Err(e),
            };

            parent_id = folder
                .id
                .ok_or_else(|| BackendError::unexpected(&lookup_url, "folder has no id"))?;
        }

        info!("folder ready");
        Ok(())
    }

    /// Storage quota, or `None` when the drive reports no usable figures.
    ///
    /// # Errors
    ///
    /// Returns any request or decode error.
    #[instrument(skip(self))]
    pub async fn quota(&self) -> Result<Option<QuotaInfo>, BackendError> {
        let drive: Drive = self
            .send_json(Method::GET, &self.drive_url(""), None::<&()>, &self.shutdown)
            .await?;
        let quota = drive.quota.as_ref().and_then(QuotaInfo::from_quota);
        if quota.is_none() {
            debug!("drive reports no quota");
        }
        Ok(quota)
    }

    /// Checks that the root folder can be resolved.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::FolderMissing`] if the root does not exist,
    /// any other request error as-is.
    #[instrument(skip(self), fields(root = %self.root()))]
    pub async fn test_connectivity(&self) -> Result<(), BackendError> {
        let _: DriveItem = self
            .send_json(Method::GET, &self.root_item_url(), None::<&()>, &self.shutdown)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    BackendError::folder_missing(self.root(), e)
                } else {
                    e
                }
            })?;
        info!("connection ok");
        Ok(())
    }

    /// Host names this backend talks to: the API host plus the upload host
    /// learned from a throwaway upload session. Cached per instance.
    ///
    /// # Errors
    ///
    /// Returns any error from creating or cancelling the probe session.
    pub async fn discover_network_endpoints(&self) -> Result<Vec<String>, BackendError> {
        self.endpoints
            .get_or_try_init(|| self.probe_endpoints())
            .await
            .cloned()
    }

    #[instrument(skip(self))]
    async fn probe_endpoints(&self) -> Result<Vec<String>, BackendError> {
        let probe = format!("DNSNameTest-{:032x}", rand::random::<u128>());
        let create_url = self.drive_url(&format!(
            "/root:{}:/createUploadSession",
            item_path(self.root(), &probe)
        ));
        let session: UploadSession = self
            .send_json(Method::POST, &create_url, None::<&()>, &self.shutdown)
            .await?;
        let upload_url = session
            .upload_url
            .ok_or_else(|| BackendError::unexpected(&create_url, "upload session has no uploadUrl"))?;

        let cancel = self.transport.request(Method::DELETE, &upload_url);
        self.send(cancel, Auth::None, &self.shutdown).await?;

        let upload_host = Url::parse(&upload_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
        let hosts = merge_hosts([self.options.base_host(), upload_host]);
        debug!(?hosts, "discovered network endpoints");
        Ok(hosts)
    }

    /// Cancels anything still running on the shutdown token and releases
    /// the transport.
    pub fn dispose(self) {
        self.shutdown.cancel();
        debug!("backend disposed");
    }
}

/// Decodes a JSON body; an empty body reads as `{}`.
pub(crate) async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let url = redact_url(response.url().as_str());
    let text = response
        .text()
        .await
        .map_err(|e| BackendError::transport(&url, e.without_url()))?;
    let body = if text.trim().is_empty() { "{}" } else { &text };
    serde_json::from_str(body).map_err(|e| BackendError::decode(url, e))
}

fn file_missing_on_not_found(name: &str, error: BackendError) -> BackendError {
    if matches!(error, BackendError::NotFound { .. }) {
        BackendError::file_missing(relative_name(name), error)
    } else {
        error
    }
}

/// Keeps the first spelling of each host, compared case-insensitively.
fn merge_hosts(hosts: impl IntoIterator<Item = Option<String>>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for host in hosts.into_iter().flatten() {
        if !merged.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
            merged.push(host);
        }
    }
    if merged.is_empty() {
        warn!("no network endpoints resolved");
    }
    merged
}
