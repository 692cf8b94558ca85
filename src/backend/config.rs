//! Backend configuration from a flat string-keyed option map.
//!
//! Options arrive once at construction (`authid=...`, `fragment-size=...`).
//! Numeric values that fail to parse fall back to their defaults with a
//! warning; structural problems (missing credential, conflicting drive
//! selectors, malformed base address) are [`BackendError::Config`] errors.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;
use url::Url;

use super::constants::{
    API_VERSION, DEFAULT_BASE_ADDRESS, DEFAULT_FRAGMENT_RETRY_COUNT,
    DEFAULT_FRAGMENT_RETRY_DELAY_MS, DEFAULT_FRAGMENT_SIZE,
};
use super::error::BackendError;

/// Bearer credential identifier.
pub const AUTHID_OPTION: &str = "authid";
/// Upload fragment size in bytes.
pub const FRAGMENT_SIZE_OPTION: &str = "fragment-size";
/// Attempts per fragment.
pub const FRAGMENT_RETRY_COUNT_OPTION: &str = "fragment-retry-count";
/// Backoff base delay in milliseconds.
pub const FRAGMENT_RETRY_DELAY_OPTION: &str = "fragment-retry-delay";
/// Explicit drive id.
pub const DRIVE_ID_OPTION: &str = "drive-id";
/// SharePoint site id.
pub const SITE_ID_OPTION: &str = "site-id";
/// Office 365 group id.
pub const GROUP_ID_OPTION: &str = "group-id";
/// Graph endpoint override.
pub const BASE_ADDRESS_OPTION: &str = "base-address";

/// One entry of [`BackendOptions::supported_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionDescriptor {
    /// Option key as written in the map.
    pub key: &'static str,
    /// Short description.
    pub description: &'static str,
    /// Default value, if any.
    pub default: Option<&'static str>,
}

/// Which drive the backend addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveTarget {
    /// The signed-in user's personal drive.
    Personal,
    /// A drive addressed by id.
    Drive(String),
    /// The default document library of a SharePoint site.
    Site(String),
    /// The document library of an Office 365 group.
    Group(String),
}

impl DriveTarget {
    /// Drive path relative to the API version prefix.
    #[must_use]
    pub fn drive_path(&self) -> String {
        match self {
            Self::Personal => "/me/drive".to_string(),
            Self::Drive(id) => format!("/drives/{}", urlencoding::encode(id)),
            Self::Site(id) => format!("/sites/{}/drive", urlencoding::encode(id)),
            Self::Group(id) => format!("/groups/{}/drive", urlencoding::encode(id)),
        }
    }
}

/// Parsed backend configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendOptions {
    /// Bearer credential identifier.
    pub auth_id: String,
    /// Configured fragment size; aligned at upload time.
    pub fragment_size: u64,
    /// Maximum attempts per fragment (at least 1).
    pub fragment_retry_count: u32,
    /// Exponential backoff base delay.
    pub fragment_retry_delay: Duration,
    /// Drive addressed by every request.
    pub drive: DriveTarget,
    /// Graph endpoint without trailing slash.
    pub base_address: String,
}

// Manual Debug so the credential identifier never lands in logs.
impl std::fmt::Debug for BackendOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendOptions")
            .field("auth_id", &"[REDACTED]")
            .field("fragment_size", &self.fragment_size)
            .field("fragment_retry_count", &self.fragment_retry_count)
            .field("fragment_retry_delay", &self.fragment_retry_delay)
            .field("drive", &self.drive)
            .field("base_address", &self.base_address)
            .finish()
    }
}

impl BackendOptions {
    /// Builds options from the flat option map.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Config`] when `authid` is missing or empty,
    /// when more than one drive selector is given, or when `base-address`
    /// is not an absolute http(s) URL.
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self, BackendError> {
        let auth_id = options
            .get(AUTHID_OPTION)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BackendError::config(AUTHID_OPTION, "a bearer credential is required"))?;

        let fragment_size = parse_or_default(options, FRAGMENT_SIZE_OPTION, DEFAULT_FRAGMENT_SIZE);
        let fragment_retry_count = parse_or_default(
            options,
            FRAGMENT_RETRY_COUNT_OPTION,
            DEFAULT_FRAGMENT_RETRY_COUNT,
        )
        .max(1);
        let fragment_retry_delay = Duration::from_millis(parse_or_default(
            options,
            FRAGMENT_RETRY_DELAY_OPTION,
            DEFAULT_FRAGMENT_RETRY_DELAY_MS,
        ));

        let drive = drive_target(options)?;
        let base_address = base_address(options)?;

        Ok(Self {
            auth_id,
            fragment_size,
            fragment_retry_count,
            fragment_retry_delay,
            drive,
            base_address,
        })
    }

    /// Every option key this backend understands.
    #[must_use]
    pub fn supported_options() -> &'static [OptionDescriptor] {
        &[
            OptionDescriptor {
                key: AUTHID_OPTION,
                description: "Bearer credential used for Graph requests",
                default: None,
            },
            OptionDescriptor {
                key: FRAGMENT_SIZE_OPTION,
                description: "Upload fragment size in bytes, aligned down to a multiple of 320 KiB",
                default: Some("10485760"),
            },
            OptionDescriptor {
                key: FRAGMENT_RETRY_COUNT_OPTION,
                description: "Attempts per fragment before the upload is aborted",
                default: Some("5"),
            },
            OptionDescriptor {
                key: FRAGMENT_RETRY_DELAY_OPTION,
                description: "Base delay in milliseconds for exponential backoff on server errors",
                default: Some("500"),
            },
            OptionDescriptor {
                key: DRIVE_ID_OPTION,
                description: "Target a specific drive by id",
                default: None,
            },
            OptionDescriptor {
                key: SITE_ID_OPTION,
                description: "Target the default document library of a SharePoint site",
                default: None,
            },
            OptionDescriptor {
                key: GROUP_ID_OPTION,
                description: "Target the document library of an Office 365 group",
                default: None,
            },
            OptionDescriptor {
                key: BASE_ADDRESS_OPTION,
                description: "Graph endpoint, for national clouds",
                default: Some(DEFAULT_BASE_ADDRESS),
            },
        ]
    }

    /// Absolute URL prefix of the configured drive: base, API version, drive path.
    #[must_use]
    pub fn drive_url(&self) -> String {
        format!("{}{API_VERSION}{}", self.base_address, self.drive.drive_path())
    }

    /// Host name of the base address.
    #[must_use]
    pub fn base_host(&self) -> Option<String> {
        Url::parse(&self.base_address)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }
}

fn parse_or_default<T>(options: &HashMap<String, String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match options.get(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(option = key, value = %raw, default = %default, "invalid option value, using default");
            default
        }),
    }
}

fn drive_target(options: &HashMap<String, String>) -> Result<DriveTarget, BackendError> {
    let selected: Vec<(&str, &String)> = [DRIVE_ID_OPTION, SITE_ID_OPTION, GROUP_ID_OPTION]
        .into_iter()
        .filter_map(|key| {
            options
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key, v))
        })
        .collect();

    match selected.as_slice() {
        [] => Ok(DriveTarget::Personal),
        [(key, id)] => {
            let id = id.trim().to_string();
            Ok(match *key {
                DRIVE_ID_OPTION => DriveTarget::Drive(id),
                SITE_ID_OPTION => DriveTarget::Site(id),
                _ => DriveTarget::Group(id),
            })
        }
        [(first, _), (second, _), ..] => Err(BackendError::config(
            *second,
            format!("cannot be combined with `{first}`"),
        )),
    }
}

fn base_address(options: &HashMap<String, String>) -> Result<String, BackendError> {
    let Some(raw) = options.get(BASE_ADDRESS_OPTION) else {
        return Ok(DEFAULT_BASE_ADDRESS.to_string());
    };
    let trimmed = raw.trim().trim_end_matches('/');
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
            Ok(trimmed.to_string())
        }
        _ => Err(BackendError::config(
            BASE_ADDRESS_OPTION,
            format!("not an absolute http(s) URL: {raw}"),
        )),
    }
}
