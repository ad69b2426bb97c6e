//! Skips mock-repository tests where the sandbox forbids localhost sockets.

use std::future::Future;
use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

/// `1`, `true` or `yes` turns a skip into a test failure.
const REQUIRE_SOCKETS_ENV: &str = "OAI_HARVESTER_REQUIRE_SOCKET_TESTS";

fn sockets_required() -> bool {
    std::env::var(REQUIRE_SOCKETS_ENV)
        .is_ok_and(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Starts a mock OAI-PMH repository, or yields `None` when no local port can
/// be bound. The skip note names the calling test's line.
#[track_caller]
pub fn start_mock_server_or_skip() -> impl Future<Output = Option<MockServer>> {
    let caller = Location::caller();
    let can_bind = TcpListener::bind("127.0.0.1:0").is_ok();
    if !can_bind {
        let note = format!(
            "mock repository unavailable at {}:{} (cannot bind 127.0.0.1)",
            caller.file(),
            caller.line()
        );
        assert!(!sockets_required(), "{note}; {REQUIRE_SOCKETS_ENV} is set");
        eprintln!("{note}; skipping. Set {REQUIRE_SOCKETS_ENV}=1 to fail instead.");
    }
    async move {
        if can_bind {
            Some(MockServer::start().await)
        } else {
            None
        }
    }
}
