//! Caller-facing values returned by backend operations.

use chrono::{DateTime, Utc};

use super::path::relative_name;
use super::types::{DriveItem, Quota};

/// One file in the backend, named relative to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Root-relative name with forward slashes and no leading or trailing slash.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Last access time; best effort, equals `last_modified` when unknown.
    pub last_accessed: DateTime<Utc>,
}

impl RemoteFile {
    /// Builds a listing entry from a drive item.
    ///
    /// Timestamps prefer the file-system facet (client-side times), then
    /// the item's own time, then the Unix epoch. Missing or negative sizes
    /// read as 0.
    #[must_use]
    pub fn from_item(item: &DriveItem) -> Self {
        let fs = item.file_system_info.as_ref();
        let last_modified = fs
            .and_then(|f| f.last_modified_date_time)
            .or(item.last_modified_date_time)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let last_accessed = fs
            .and_then(|f| f.last_accessed_date_time)
            .unwrap_or(last_modified);

        Self {
            name: relative_name(item.name.as_deref().unwrap_or_default()),
            size: item.size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
            last_modified,
            last_accessed,
        }
    }
}

/// Storage quota of the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaInfo {
    /// Total bytes.
    pub total: u64,
    /// Bytes still available.
    pub remaining: u64,
}

impl QuotaInfo {
    /// Converts the service quota, treating all-zero usage as unknown.
    ///
    /// Some drive variants always report zeros, which would otherwise read
    /// as a full drive.
    #[must_use]
    pub fn from_quota(quota: &Quota) -> Option<Self> {
        if quota.total == 0 && quota.used == 0 && quota.remaining == 0 && quota.deleted == 0 {
            return None;
        }
        Some(Self {
            total: u64::try_from(quota.total).unwrap_or(0),
            remaining: u64::try_from(quota.remaining).unwrap_or(0),
        })
    }
}
