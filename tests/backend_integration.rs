//! Integration tests for the Graph backend operations against a mock server.
//!
//! Covers listing, fetch, delete, rename, folder creation, quota,
//! connectivity checks, endpoint discovery and single-shot store.

use std::time::Duration;

use futures_util::TryStreamExt;
use graphdrive_core::{BackendError, UploadStream};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::{DRIVE, TOKEN, backend, mock_graph, payload};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = mock_graph().await else {
            return;
        };
        mock_server
    }};
}

fn file_item(name: &str, size: u64) -> serde_json::Value {
    json!({
        "id": format!("id-{name}"),
        "name": name,
        "size": size,
        "file": {"mimeType": "application/octet-stream"},
        "fileSystemInfo": {"lastModifiedDateTime": "2024-03-01T12:00:00Z"}
    })
}

// ==================== list Tests ====================

#[tokio::test]
async fn test_list_follows_next_link_and_filters_items() {
    let mock_server = require_mock_server!();
    let next_link = format!("{}/v1.0/me/drive/items/root-id/children?$skiptoken=p2", mock_server.uri());

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups:/children")))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                file_item("vol-1.zip", 100),
                {"id": "f", "name": "subfolder", "folder": {"childCount": 1}},
                {"id": "d", "name": "gone.zip", "file": {}, "deleted": {"state": "deleted"}}
            ],
            "@odata.nextLink": next_link
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/items/root-id/children")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [file_item("vol-2.zip", 200)]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let files: Vec<_> = backend.list().try_collect().await.unwrap();

    let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["vol-1.zip", "vol-2.zip"]);
    assert_eq!(files[0].size, 100);
    assert_eq!(files[0].last_modified.to_rfc3339(), "2024-03-01T12:00:00+00:00");
}

#[tokio::test]
async fn test_list_is_lazy() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups:/children")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let listing = backend.list();
    drop(listing);
}

#[tokio::test]
async fn test_list_missing_root_is_folder_missing() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/nothing-here:/children")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "itemNotFound", "message": "The resource could not be found."}
        })))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "nothing-here", &[]);
    let result = backend.list_all().await;

    match result {
        Err(BackendError::FolderMissing { path, source }) => {
            assert_eq!(path, "/nothing-here");
            assert!(matches!(*source, BackendError::NotFound { .. }));
        }
        other => panic!("expected FolderMissing, got {other:?}"),
    }
}

// ==================== fetch Tests ====================

#[tokio::test]
async fn test_fetch_streams_content() {
    let mock_server = require_mock_server!();
    let content = payload(200_000);

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups/vol-1.zip:/content")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let mut destination = Vec::new();
    let written = backend.fetch("vol-1.zip", &mut destination).await.unwrap();

    assert_eq!(written, 200_000);
    assert_eq!(destination, content);
}

#[tokio::test]
async fn test_fetch_missing_object_is_file_missing() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups/absent.zip:/content")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let mut destination = Vec::new();
    let error = backend
        .fetch("absent.zip", &mut destination)
        .await
        .unwrap_err();

    assert!(
        matches!(error, BackendError::FileMissing { ref name, .. } if name == "absent.zip"),
        "expected FileMissing, got {error:?}"
    );
    assert_eq!(error.status(), Some(404));
}

#[tokio::test]
async fn test_fetch_to_file_removes_partial_file_on_failure() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups/absent.zip:/content")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let local = temp_dir.path().join("absent.zip");
    let backend = backend(&mock_server, "backups", &[]);

    assert!(backend.fetch_to_file("absent.zip", &local).await.is_err());
    assert!(!local.exists());
}

#[tokio::test]
async fn test_fetch_to_file_writes_file() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups/vol-1.zip:/content")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"volume".to_vec()))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let local = temp_dir.path().join("vol-1.zip");
    let backend = backend(&mock_server, "backups", &[]);

    assert_eq!(backend.fetch_to_file("vol-1.zip", &local).await.unwrap(), 6);
    assert_eq!(std::fs::read(&local).unwrap(), b"volume");
}

// ==================== delete / rename Tests ====================

#[tokio::test]
async fn test_delete_sends_delete() {
    let mock_server = require_mock_server!();

    Mock::given(method("DELETE"))
        .and(path(format!("{DRIVE}/root:/backups/vol-1.zip")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    backend.delete("vol-1.zip").await.unwrap();
}

#[tokio::test]
async fn test_delete_missing_is_file_missing() {
    let mock_server = require_mock_server!();

    Mock::given(method("DELETE"))
        .and(path(format!("{DRIVE}/root:/backups/vol-9.zip")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let error = backend.delete("vol-9.zip").await.unwrap_err();
    assert!(matches!(error, BackendError::FileMissing { .. }));
    assert!(error.is_not_found());
}

#[tokio::test]
async fn test_rename_patches_name() {
    let mock_server = require_mock_server!();

    Mock::given(method("PATCH"))
        .and(path(format!("{DRIVE}/root:/backups/old.zip")))
        .and(body_json(json!({"name": "new.zip"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_item("new.zip", 1)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    backend.rename("old.zip", "new.zip").await.unwrap();
}

#[tokio::test]
async fn test_rename_to_nested_name_patches_leaf_only() {
    let mock_server = require_mock_server!();

    Mock::given(method("PATCH"))
        .and(path(format!("{DRIVE}/root:/backups/old.zip")))
        .and(body_json(json!({"name": "new.zip"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(file_item("new.zip", 1)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    backend.rename("old.zip", "nested\\new.zip").await.unwrap();
}

#[tokio::test]
async fn test_rename_missing_is_file_missing() {
    let mock_server = require_mock_server!();

    Mock::given(method("PATCH"))
        .and(path(format!("{DRIVE}/root:/backups/old.zip")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let error = backend.rename("old.zip", "new.zip").await.unwrap_err();
    assert!(matches!(error, BackendError::FileMissing { .. }));
}

// ==================== create_folder Tests ====================

#[tokio::test]
async fn test_create_folder_creates_only_missing_components() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "backups-id", "name": "backups", "folder": {}})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups/laptop")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{DRIVE}/items/backups-id/children")))
        .and(body_json(json!({"name": "laptop", "folder": {}})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"id": "laptop-id", "name": "laptop", "folder": {}})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups/laptop", &[]);
    backend.create_folder().await.unwrap();
}

#[tokio::test]
async fn test_create_folder_existing_path_creates_nothing() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "backups-id"})))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    backend.create_folder().await.unwrap();
}

// ==================== quota Tests ====================

#[tokio::test]
async fn test_quota_reported() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(DRIVE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "drive",
            "quota": {"total": 1000, "used": 250, "remaining": 750, "deleted": 0, "state": "normal"}
        })))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let quota = backend.quota().await.unwrap().unwrap();
    assert_eq!(quota.total, 1000);
    assert_eq!(quota.remaining, 750);
}

#[tokio::test]
async fn test_quota_all_zero_is_unknown() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(DRIVE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "quota": {"total": 0, "used": 0, "remaining": 0, "deleted": 0}
        })))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    assert_eq!(backend.quota().await.unwrap(), None);
}

#[tokio::test]
async fn test_quota_uses_configured_drive() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path("/v1.0/sites/site-1/drive"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"quota": {"total": 5, "remaining": 5}})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[("site-id", "site-1")]);
    assert!(backend.quota().await.unwrap().is_some());
}

// ==================== test_connectivity Tests ====================

#[tokio::test]
async fn test_connectivity_ok() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x", "folder": {}})))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    backend.test_connectivity().await.unwrap();
}

#[tokio::test]
async fn test_connectivity_missing_root_is_folder_missing() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let error = backend.test_connectivity().await.unwrap_err();
    assert!(matches!(error, BackendError::FolderMissing { .. }));
}

#[tokio::test]
async fn test_connectivity_server_error_stays_protocol_error() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(format!("{DRIVE}/root:/backups")))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let error = backend.test_connectivity().await.unwrap_err();
    assert!(matches!(error, BackendError::Protocol { .. }));
    assert_eq!(error.status(), Some(500));
}

// ==================== Redaction / Throttling Tests ====================

#[tokio::test]
async fn test_protocol_error_dump_is_redacted() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(DRIVE))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": "InvalidAuthenticationToken"}
        })))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let error = backend.quota().await.unwrap_err();
    let context = error.response_context().unwrap();

    assert_eq!(context.status, 401);
    assert!(!context.dump.contains(TOKEN), "token leaked: {}", context.dump);
    assert!(context.dump.contains("[REDACTED]"));
    assert!(context.dump.contains("InvalidAuthenticationToken"));
    assert!(!error.to_string().contains(TOKEN));
}

#[tokio::test]
async fn test_retry_after_hint_delays_next_request() {
    let mock_server = require_mock_server!();

    Mock::given(method("GET"))
        .and(path(DRIVE))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(DRIVE))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"quota": {"total": 1}})))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let error = backend.quota().await.unwrap_err();
    assert_eq!(error.status(), Some(429));
    assert!(backend.rate_limiter().next_allowed_in() > Duration::from_millis(500));

    let start = std::time::Instant::now();
    assert!(backend.quota().await.unwrap().is_some());
    assert!(start.elapsed() >= Duration::from_millis(500));
}

// ==================== discover_network_endpoints Tests ====================

#[tokio::test]
async fn test_discover_endpoints_includes_upload_host_and_caches() {
    let mock_server = require_mock_server!();
    let port = mock_server.address().port();

    Mock::given(method("POST"))
        .and(wiremock::matchers::path_regex(
            r"^/v1\.0/me/drive/root:/backups/DNSNameTest-[0-9a-f]{32}:/createUploadSession$",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("http://localhost:{port}/upload/probe"),
            "expirationDateTime": "2030-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/upload/probe"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let first = backend.discover_network_endpoints().await.unwrap();
    let second = backend.discover_network_endpoints().await.unwrap();

    assert_eq!(first, vec!["127.0.0.1".to_string(), "localhost".to_string()]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_discover_endpoints_same_host_deduplicated() {
    let mock_server = require_mock_server!();

    Mock::given(method("POST"))
        .and(wiremock::matchers::path_regex(r":/createUploadSession$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/probe", mock_server.uri())
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/upload/probe"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let hosts = backend.discover_network_endpoints().await.unwrap();
    assert_eq!(hosts, vec!["127.0.0.1".to_string()]);
}

// ==================== single-shot store Tests ====================

#[tokio::test]
async fn test_small_store_is_single_put_with_credentials() {
    let mock_server = require_mock_server!();
    let content = payload(64 * 1024);

    Mock::given(method("PUT"))
        .and(path(format!("{DRIVE}/root:/backups/small.bin:/content")))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .and(wiremock::matchers::body_bytes(content.clone()))
        .respond_with(ResponseTemplate::new(201).set_body_json(file_item("small.bin", 65_536)))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let backend = backend(&mock_server, "backups", &[]);
    let cancel = CancellationToken::new();
    backend
        .store("small.bin", UploadStream::from_bytes(content), &cancel)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_store_file_reads_local_file() {
    let mock_server = require_mock_server!();

    Mock::given(method("PUT"))
        .and(path(format!("{DRIVE}/root:/backups/notes.txt:/content")))
        .and(wiremock::matchers::body_bytes(b"hello graph".to_vec()))
        .respond_with(ResponseTemplate::new(201).set_body_json(file_item("notes.txt", 11)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let local = temp_dir.path().join("notes.txt");
    std::fs::write(&local, b"hello graph").unwrap();

    let backend = backend(&mock_server, "backups", &[]);
    backend
        .store_file("notes.txt", &local, &CancellationToken::new())
        .await
        .unwrap();
}
