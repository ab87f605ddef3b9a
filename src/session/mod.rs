//! Orchestrates one "session" per shell: drives peer setup, signaling,
//! encrypted channels, recording, public-viewer provisioning, and
//! recovery.
//!
//! Grounded on `hub/state.rs`/`hub/hub_handle.rs`'s single-lock-over-
//! combined-maps shape (`by_id`/`by_code` sharing one lock) and
//! `hub/daemon.rs`'s PID-liveness-check pattern, reused for shell-PID
//! liveness during `load_from_disk` recovery.

mod manager;
mod negotiate;
mod record;

pub use manager::{SessionError, SessionManager, StartSessionParams};
pub use record::{PersistedSession, SessionStartResult, SessionStatus, SessionSummary};

/// Hard cap on concurrently running sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 100;
/// Default idle timeout before a disconnected/recovered session is swept.
pub const DEFAULT_IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30 * 60);
/// How long `start_session` blocks waiting for the short-code-ready signal.
pub const SHORT_CODE_READY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
