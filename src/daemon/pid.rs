//! PID file handling and single-instance enforcement.
//!
//! Grounded on `hub/daemon.rs`'s `write_pid_file`/`read_pid_file`/
//! `is_hub_running` trio, narrowed to this crate's single always-at-
//! `~/.tt/tt.pid` daemon instead of a per-hub-id file layout.

use anyhow::{bail, Context, Result};

use crate::{procutil, state};

/// Writes the current process's PID to `~/.tt/tt.pid`, mode 0600.
pub fn write_pid_file() -> Result<()> {
    let path = state::pid_path()?;
    let pid = std::process::id();
    state::write_private_file(&path, pid.to_string().as_bytes())
        .with_context(|| format!("failed to write pid file {}", path.display()))
}

/// Reads the PID recorded in `~/.tt/tt.pid`, if any.
pub fn read_pid_file() -> Option<u32> {
    let path = state::pid_path().ok()?;
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Removes `~/.tt/tt.pid`, ignoring a missing file.
pub fn remove_pid_file() {
    if let Ok(path) = state::pid_path() {
        let _ = std::fs::remove_file(path);
    }
}

/// Whether a live daemon process is recorded.
pub fn is_daemon_running() -> bool {
    read_pid_file().is_some_and(procutil::is_process_alive)
}

/// Fails if another daemon instance already holds the PID file.
pub fn ensure_not_already_running() -> Result<()> {
    if is_daemon_running() {
        bail!("a daemon is already running (pid {})", read_pid_file().unwrap_or(0));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(state::STATE_DIR_ENV, dir.path());
        write_pid_file().unwrap();
        assert_eq!(read_pid_file(), Some(std::process::id()));
        assert!(is_daemon_running());
        remove_pid_file();
        assert!(read_pid_file().is_none());
        std::env::remove_var(state::STATE_DIR_ENV);
    }

    #[test]
    fn test_no_pid_file_means_not_running() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(state::STATE_DIR_ENV, dir.path());
        assert!(!is_daemon_running());
        std::env::remove_var(state::STATE_DIR_ENV);
    }
}
