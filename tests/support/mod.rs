//! Shared helpers for integration tests against a wiremock Graph API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::OnceLock;

use graphdrive_core::GraphBackend;
use wiremock::MockServer;

/// Bearer token every test backend sends.
pub const TOKEN: &str = "EwB4A8l6BAAU-test-bearer-token";

/// Drive prefix of the personal drive, as seen by the mock server.
pub const DRIVE: &str = "/v1.0/me/drive";

/// Set to `1` to turn a sandbox without loopback sockets into a failure
/// instead of a skip.
const STRICT_SOCKETS_ENV: &str = "GRAPHDRIVE_REQUIRE_SOCKET_TESTS";

fn loopback_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| TcpListener::bind("127.0.0.1:0").is_ok())
}

fn strict_sockets() -> bool {
    std::env::var(STRICT_SOCKETS_ENV)
        .is_ok_and(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Starts a mock Graph server, or returns `None` (after saying why) when
/// loopback sockets are unavailable.
#[track_caller]
pub fn mock_graph() -> impl std::future::Future<Output = Option<MockServer>> {
    let caller = std::panic::Location::caller();
    async move {
        if loopback_available() {
            return Some(MockServer::start().await);
        }
        let message = format!(
            "[mock-graph] no loopback socket for {}:{}",
            caller.file(),
            caller.line()
        );
        assert!(!strict_sockets(), "{message}; unset {STRICT_SOCKETS_ENV} to skip");
        eprintln!("{message}; skipping (set {STRICT_SOCKETS_ENV}=1 to fail instead)");
        None
    }
}

/// Builds a backend rooted at `root` that talks to `server`.
pub fn backend(server: &MockServer, root: &str, extra: &[(&str, &str)]) -> GraphBackend {
    let mut options = HashMap::from([
        ("authid".to_string(), TOKEN.to_string()),
        ("base-address".to_string(), server.uri()),
    ]);
    for (key, value) in extra {
        options.insert((*key).to_string(), (*value).to_string());
    }
    GraphBackend::new(&format!("onedrivev2://{root}"), &options).expect("test backend")
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
