//! Root path resolution and path fragment normalization.
//!
//! The backend root is taken from the host and path of the connection URL
//! (`onedrivev2://backups/laptop` -> `/backups/laptop`). Every fragment is
//! normalized with [`normalize_slashes`] before it is embedded in a request
//! URL, so composing paths is idempotent.

use url::Url;

use super::error::BackendError;

/// Normalizes slashes in a path fragment.
///
/// Backslashes become forward slashes, a single leading slash is ensured
/// (unless the fragment is empty) and all trailing slashes are removed.
///
/// ```
/// use graphdrive_core::backend::normalize_slashes;
///
/// assert_eq!(normalize_slashes(""), "");
/// assert_eq!(normalize_slashes("test"), "/test");
/// assert_eq!(normalize_slashes("test/"), "/test");
/// assert_eq!(normalize_slashes("a\\b"), "/a/b");
/// ```
#[must_use]
pub fn normalize_slashes(fragment: &str) -> String {
    let mut normalized = fragment.replace('\\', "/");

    if !normalized.is_empty() && !normalized.starts_with('/') {
        normalized.insert(0, '/');
    }
    while normalized.ends_with('/') {
        normalized.pop();
    }

    normalized
}

/// Derives the backend root from a parsed connection URL.
///
/// The host and path are percent-decoded and normalized. Undecodable input
/// is used as-is.
#[must_use]
pub fn root_from_url(url: &Url) -> String {
    let host_and_path = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
    let decoded = urlencoding::decode(&host_and_path)
        .map_or_else(|_| host_and_path.clone(), std::borrow::Cow::into_owned);
    normalize_slashes(&decoded)
}

/// Parses `connection_url` and derives the backend root.
///
/// # Errors
///
/// Returns [`BackendError::InvalidUrl`] if the URL does not parse.
pub fn resolve_root(connection_url: &str) -> Result<String, BackendError> {
    let url =
        Url::parse(connection_url).map_err(|_| BackendError::invalid_url(connection_url))?;
    Ok(root_from_url(&url))
}

/// Percent-encodes each segment of a normalized path, keeping the slashes.
///
/// ```
/// use graphdrive_core::backend::encode_path;
///
/// assert_eq!(encode_path("/backups/my file#1.zip"), "/backups/my%20file%231.zip");
/// ```
#[must_use]
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins the root and a remote name into an encoded item path.
#[must_use]
pub(crate) fn item_path(root: &str, name: &str) -> String {
    encode_path(&format!("{root}{}", normalize_slashes(name)))
}

/// Normalizes a remote entry name: forward slashes, no leading or trailing slash.
#[must_use]
pub(crate) fn relative_name(name: &str) -> String {
    normalize_slashes(name).trim_start_matches('/').to_string()
}

/// Last segment of a normalized name; a rename only ever changes the leaf.
#[must_use]
pub(crate) fn leaf_name(name: &str) -> String {
    let name = relative_name(name);
    match name.rsplit_once('/') {
        Some((_, leaf)) => leaf.to_string(),
        None => name,
    }
}
