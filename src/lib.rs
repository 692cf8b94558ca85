//! Graphdrive Core Library
//!
//! This library provides the storage backend of a backup client for
//! Microsoft Graph drives (OneDrive, OneDrive for Business, SharePoint
//! document libraries and Office 365 group drives).
//!
//! # Architecture
//!
//! Everything lives under [`backend`]:
//! - [`backend::RateLimiter`] - server-driven throttling from `Retry-After` hints
//! - [`backend::classify`] - response classification and redacted diagnostics
//! - [`backend::resolve_root`] / [`backend::normalize_slashes`] - root path handling
//! - [`backend::GraphBackend`] - list, fetch, store, delete, rename, folders, quota
//! - upload sessions - fragmented, sequential, retried per fragment
//!
//! Token acquisition and job scheduling are the caller's concern: the
//! backend takes a bearer credential and runs one transfer at a time.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
mod user_agent;

// Re-export commonly used types
pub use backend::{
    BackendError, BackendOptions, FragmentRetryPolicy, GraphBackend, QuotaInfo, RateLimiter,
    RemoteFile, UploadStream,
};
