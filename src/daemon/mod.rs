//! The background process: PID file + single-instance enforcement, the
//! Unix socket JSON-RPC server, periodic idle sweeping, and graceful
//! shutdown on SIGINT/SIGTERM.
//!
//! Grounded on `hub/daemon.rs`'s PID-file/liveness-check conventions and
//! `socket/server.rs`'s accept-loop shape, retargeted at this crate's
//! single-socket JSON-RPC contract (spec §4.10) instead of the heritage's
//! per-hub multi-client protocol.

pub mod ipc;
pub mod pid;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

use crate::session::SessionManager;
use crate::state;

/// How often `SessionManager::cleanup_idle_sessions` runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Runs the daemon in the foreground: binds the socket, writes the PID
/// file, spawns the cleanup sweeper and signal handlers, and serves
/// JSON-RPC connections until told to shut down.
pub async fn run() -> Result<()> {
    pid::ensure_not_already_running()?;
    pid::write_pid_file()?;
    let started_at = std::time::Instant::now();

    let cancel = CancellationToken::new();
    let manager = Arc::new(SessionManager::new(cancel.child_token()));
    manager.load_from_disk();

    let socket_path = state::socket_path()?;
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("failed to remove stale socket {}", socket_path.display()))?;
    }
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to bind socket {}", socket_path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
            .context("failed to set socket permissions")?;
    }
    log::info!("daemon listening on {}", socket_path.display());

    let accept_handle = tokio::spawn(ipc::accept_loop(
        listener,
        Arc::clone(&manager),
        cancel.clone(),
        started_at,
    ));
    let cleanup_handle = tokio::spawn(cleanup_loop(Arc::clone(&manager), cancel.clone()));
    let signal_handle = tokio::spawn(wait_for_shutdown_signal(cancel.clone()));

    cancel.cancelled().await;
    log::info!("daemon shutting down");

    manager.stop_all_sessions();
    accept_handle.abort();
    cleanup_handle.abort();
    signal_handle.abort();

    let _ = std::fs::remove_file(&socket_path);
    pid::remove_pid_file();

    Ok(())
}

async fn cleanup_loop(manager: Arc<SessionManager>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => manager.cleanup_idle_sessions(crate::session::DEFAULT_IDLE_TIMEOUT),
            () = cancel.cancelled() => break,
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};
    let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
        return;
    };
    let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
        return;
    };
    tokio::select! {
        _ = sigint.recv() => log::info!("received SIGINT"),
        _ = sigterm.recv() => log::info!("received SIGTERM"),
        () = cancel.cancelled() => return,
    }
    cancel.cancel();
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    cancel.cancel();
}

/// Connects to the running daemon's socket, or returns an error describing
/// why it's unreachable (used by the CLI's `daemon status`/`stop`/session
/// commands).
pub async fn connect() -> Result<tokio::net::UnixStream> {
    let socket_path = state::socket_path()?;
    if !pid::is_daemon_running() {
        bail!("daemon is not running");
    }
    tokio::net::UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("failed to connect to daemon socket {}", socket_path.display()))
}
