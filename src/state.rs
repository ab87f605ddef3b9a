//! Per-user state directory resolution and the 0700/0600 permission
//! conventions used for everything this daemon persists.
//!
//! Grounded on the heritage `config.rs`'s `config_dir()` (env var override
//! for test isolation, falling back to a platform directory) and its
//! `save()`'s `set_permissions(0o600)` pattern, generalized to the
//! directory-mode-0700 requirement this daemon's state carries (session
//! secrets live here, not just a config file).

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Overrides the state directory; used by tests and anyone who wants more
/// than one daemon instance on a single machine.
pub const STATE_DIR_ENV: &str = "TT_STATE_DIR";

#[cfg(unix)]
fn ensure_dir_mode(path: &std::path::Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn ensure_dir_mode(_path: &std::path::Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Returns `~/.tt` (or `$TT_STATE_DIR` if set), creating it with mode 0700
/// if it doesn't already exist.
pub fn state_dir() -> Result<PathBuf> {
    let dir = if let Ok(override_dir) = std::env::var(STATE_DIR_ENV) {
        PathBuf::from(override_dir)
    } else {
        dirs::home_dir()
            .context("could not determine home directory")?
            .join(".tt")
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create state directory {}", dir.display()))?;
    ensure_dir_mode(&dir, 0o700)?;
    Ok(dir)
}

/// `~/.tt/sessions/`, created on demand.
pub fn sessions_dir() -> Result<PathBuf> {
    let dir = state_dir()?.join("sessions");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create sessions directory {}", dir.display()))?;
    ensure_dir_mode(&dir, 0o700)?;
    Ok(dir)
}

/// `~/.tt/recordings/`, created on demand.
pub fn recordings_dir() -> Result<PathBuf> {
    let dir = state_dir()?.join("recordings");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create recordings directory {}", dir.display()))?;
    ensure_dir_mode(&dir, 0o700)?;
    Ok(dir)
}

/// `~/.tt/tt.pid`.
pub fn pid_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("tt.pid"))
}

/// `~/.tt/tt.sock` (Unix). There is no Windows named-pipe equivalent wired
/// up yet; see `SPEC_FULL.md` §9 / spec.md §9 on Windows PTY support.
pub fn socket_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("tt.sock"))
}

/// `~/.tt/sessions/{short_code}.json`.
pub fn session_file_path(short_code: &str) -> Result<PathBuf> {
    Ok(sessions_dir()?.join(format!("{short_code}.json")))
}

/// Writes `contents` to `path`, replacing any existing file, with mode
/// 0600.
pub fn write_private_file(path: &std::path::Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_dir_honors_env_override() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(STATE_DIR_ENV, dir.path());
        let resolved = state_dir().unwrap();
        assert_eq!(resolved, dir.path());
        std::env::remove_var(STATE_DIR_ENV);
    }

    #[test]
    fn test_session_file_path_uses_sessions_subdir() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(STATE_DIR_ENV, dir.path());
        let path = session_file_path("ABCDJKMN").unwrap();
        assert_eq!(path, dir.path().join("sessions").join("ABCDJKMN.json"));
        std::env::remove_var(STATE_DIR_ENV);
    }

    #[test]
    #[cfg(unix)]
    fn test_write_private_file_sets_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        write_private_file(&path, b"{}").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
