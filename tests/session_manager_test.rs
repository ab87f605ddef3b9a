//! End-to-end coverage of `SessionManager` against a real PTY, with state
//! isolated to a tempdir (`TT_STATE_DIR`) per test per teacher convention
//! (`pty_integration_test.rs` spawns real ptys; `hub/state.rs`'s tests
//! isolate state the same way via an env override).

use std::sync::Arc;
use std::time::Duration;

use terminal_tunnel::session::{SessionError, SessionManager, StartSessionParams};
use tokio_util::sync::CancellationToken;

fn isolated_state_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("TT_STATE_DIR", dir.path());
    dir
}

fn start_params() -> StartSessionParams {
    StartSessionParams {
        password: Some("a-plenty-long-password".to_string()),
        shell: Some("/bin/sh".to_string()),
        public: false,
        record: false,
        // No relay reachable in tests: negotiation fails quickly and the
        // session stays in `Waiting`/`Disconnected`, but `start_session`
        // still returns a summary once its bounded wait elapses.
        relay_url: Some("http://127.0.0.1:1".to_string()),
        client_url_base: "https://app.terminal-tunnel.dev".to_string(),
        turn_servers: Vec::new(),
        rows: 24,
        cols: 80,
        relay_ws: false,
    }
}

#[tokio::test]
async fn test_start_session_spawns_a_real_shell_and_lists_it() {
    let _dir = isolated_state_dir();
    let manager = Arc::new(SessionManager::new(CancellationToken::new()));

    let result = manager.start_session(start_params()).await.unwrap();
    assert!(!result.summary.id.is_empty());
    assert_eq!(result.summary.shell, "/bin/sh");
    assert!(result.summary.shell_pid > 0);
    assert_eq!(result.password, "a-plenty-long-password");
    assert!(!result.public);

    let listed = manager.list_sessions();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, result.summary.id);

    manager.stop_session(&result.summary.id).unwrap();
    assert!(manager.list_sessions().is_empty());
}

#[tokio::test]
async fn test_stop_session_accepts_short_code_once_assigned() {
    let _dir = isolated_state_dir();
    let manager = Arc::new(SessionManager::new(CancellationToken::new()));
    let result = manager.start_session(start_params()).await.unwrap();

    // No relay was reachable, so negotiation never assigns a short code;
    // stopping by id must still work regardless.
    assert!(manager.stop_session(&result.summary.id).is_ok());
}

#[tokio::test]
async fn test_stop_unknown_session_returns_not_found() {
    let _dir = isolated_state_dir();
    let manager = Arc::new(SessionManager::new(CancellationToken::new()));
    let err = manager.stop_session("does-not-exist").unwrap_err();
    assert!(matches!(err, SessionError::NotFound));
}

#[tokio::test]
async fn test_password_too_short_is_rejected_before_spawning_a_shell() {
    let _dir = isolated_state_dir();
    let manager = Arc::new(SessionManager::new(CancellationToken::new()));
    let mut params = start_params();
    params.password = Some("short".to_string());

    let err = manager.start_session(params).await.unwrap_err();
    assert!(matches!(err, SessionError::PasswordTooShort));
    assert!(manager.list_sessions().is_empty());
}

#[tokio::test]
async fn test_cleanup_idle_sessions_leaves_fresh_sessions_alone() {
    let _dir = isolated_state_dir();
    let manager = Arc::new(SessionManager::new(CancellationToken::new()));
    let result = manager.start_session(start_params()).await.unwrap();

    manager.cleanup_idle_sessions(Duration::from_secs(3600));
    assert_eq!(manager.list_sessions().len(), 1);

    manager.stop_session(&result.summary.id).unwrap();
}
