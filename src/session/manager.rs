//! Owns every live session: the `by_id`/`by_code` lookup tables, the
//! caps/validation the daemon enforces before starting one, idle sweeping,
//! and disk-backed recovery after a daemon restart.
//!
//! Grounded on `hub/state.rs`'s single-lock-over-combined-maps shape and
//! `hub/daemon.rs`'s PID-liveness recovery loop, retargeted at this crate's
//! session lifecycle instead of worktree/agent lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::channel::IceServerConfig;
use crate::crypto;
use crate::pty::{Bridge, PtySession};
use crate::recording::Recording;
use crate::{procutil, state};

use super::negotiate::{self, HostSessionConfig, ShortCodeReady};
use super::record::{PersistedSession, SessionStartResult, SessionStatus, SessionSummary};
use super::{DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS, SHORT_CODE_READY_TIMEOUT};

/// Gap between polls while `start_session` waits (bounded) for the
/// short-code-ready signal, matching the poll cadence already used for
/// long-poll signaling (`signaling::short_code::POLL_GAP`).
const READY_POLL_GAP: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum SessionError {
    TooManySessions,
    PasswordTooShort,
    NotFound,
    Pty(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManySessions => write!(f, "too many sessions are already running"),
            Self::PasswordTooShort => write!(
                f,
                "password must be at least {} characters",
                crypto::MIN_PASSWORD_LEN
            ),
            Self::NotFound => write!(f, "session not found"),
            Self::Pty(msg) => write!(f, "failed to start pty: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

pub struct StartSessionParams {
    pub password: Option<String>,
    pub shell: Option<String>,
    pub public: bool,
    pub record: bool,
    pub relay_url: Option<String>,
    pub client_url_base: String,
    pub turn_servers: Vec<IceServerConfig>,
    pub rows: u16,
    pub cols: u16,
    /// Selects the relay-websocket answer path over short-code HTTP
    /// long-polling (spec §4.6's alternative signaling path).
    pub relay_ws: bool,
}

struct ManagedState {
    short_code: String,
    viewer_code: Option<String>,
    status: SessionStatus,
    created_at: chrono::DateTime<Utc>,
    last_seen: chrono::DateTime<Utc>,
    client_url: String,
    viewer_url: Option<String>,
    password: String,
}

/// One running (or recovered) session, shared between `by_id` and
/// `by_code`.
pub struct ManagedSession {
    pub id: String,
    pub salt: [u8; 16],
    pub shell: String,
    pub pty_path: String,
    pub shell_pid: u32,
    pub bridge: Option<Arc<Bridge>>,
    pub cancel: CancellationToken,
    state: StdMutex<ManagedState>,
}

impl ManagedSession {
    fn has_short_code(&self) -> bool {
        // Unwrap: this process is the only writer and never panics while
        // holding the lock.
        !self.state.lock().expect("managed session state lock").short_code.is_empty()
    }

    fn apply_ready(&self, ready: ShortCodeReady, viewer_code: Option<String>, viewer_url: Option<String>) {
        let mut state = self.state.lock().expect("managed session state lock");
        state.short_code = ready.short_code;
        state.client_url = ready.client_url;
        state.viewer_code = viewer_code;
        state.viewer_url = viewer_url;
    }

    fn set_status(&self, status: SessionStatus) {
        let mut state = self.state.lock().expect("managed session state lock");
        state.status = status;
        state.last_seen = Utc::now();
    }

    fn status(&self) -> SessionStatus {
        self.state.lock().expect("managed session state lock").status
    }

    fn last_seen(&self) -> chrono::DateTime<Utc> {
        self.state.lock().expect("managed session state lock").last_seen
    }

    fn short_code(&self) -> String {
        self.state.lock().expect("managed session state lock").short_code.clone()
    }

    fn password(&self) -> String {
        self.state.lock().expect("managed session state lock").password.clone()
    }

    fn to_persisted(&self) -> PersistedSession {
        let state = self.state.lock().expect("managed session state lock");
        PersistedSession {
            id: self.id.clone(),
            short_code: state.short_code.clone(),
            viewer_code: state.viewer_code.clone(),
            salt: self.salt,
            shell: self.shell.clone(),
            pty_path: self.pty_path.clone(),
            shell_pid: self.shell_pid,
            status: state.status,
            created_at: state.created_at,
            last_seen: state.last_seen,
            client_url: state.client_url.clone(),
            viewer_url: state.viewer_url.clone(),
        }
    }

    fn to_summary(&self) -> SessionSummary {
        let state = self.state.lock().expect("managed session state lock");
        SessionSummary {
            id: self.id.clone(),
            short_code: state.short_code.clone(),
            viewer_code: state.viewer_code.clone(),
            status: state.status,
            shell: self.shell.clone(),
            shell_pid: self.shell_pid,
            created_at: state.created_at,
            last_seen: state.last_seen,
            client_url: state.client_url.clone(),
            viewer_url: state.viewer_url.clone(),
        }
    }
}

struct SessionTables {
    by_id: HashMap<String, Arc<ManagedSession>>,
    by_code: HashMap<String, Arc<ManagedSession>>,
}

/// Owns every session this daemon is tracking.
pub struct SessionManager {
    tables: StdMutex<SessionTables>,
    daemon_cancel: CancellationToken,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(daemon_cancel: CancellationToken) -> Self {
        Self {
            tables: StdMutex::new(SessionTables {
                by_id: HashMap::new(),
                by_code: HashMap::new(),
            }),
            daemon_cancel,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    /// Starts a new session: spawns the shell, wires the bridge, and
    /// launches the negotiation in the background, blocking briefly for
    /// the short code to become available.
    pub async fn start_session(
        self: &Arc<Self>,
        params: StartSessionParams,
    ) -> Result<SessionStartResult, SessionError> {
        {
            let tables = self.tables.lock().expect("session tables lock");
            if tables.by_id.len() >= self.max_sessions {
                return Err(SessionError::TooManySessions);
            }
        }
        if let Some(password) = &params.password {
            if !crypto::validate_password_length(password) {
                return Err(SessionError::PasswordTooShort);
            }
        }

        let id = generate_id();
        let password = params
            .password
            .clone()
            .unwrap_or_else(|| crypto::generate_password(20));
        let shell = params
            .shell
            .clone()
            .unwrap_or_else(|| std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()));
        let salt = crypto::generate_salt();

        let (pty, reader) = PtySession::start(&shell, params.rows, params.cols)
            .map_err(|e| SessionError::Pty(e.to_string()))?;
        let pty_path = pty.pty_path().to_string();
        let shell_pid = pty.shell_pid();

        let bridge = Bridge::spawn(pty, reader, None, crate::pty::bridge::DEFAULT_BUFFER_MAX);

        if params.record {
            if let Ok(recording) =
                Recording::create(&recording_path(&id), params.rows, params.cols, &shell)
            {
                bridge.set_recorder(Arc::new(recording)).await;
            }
        }

        let now = Utc::now();
        let session = Arc::new(ManagedSession {
            id: id.clone(),
            salt,
            shell: shell.clone(),
            pty_path,
            shell_pid,
            bridge: Some(Arc::clone(&bridge)),
            cancel: self.daemon_cancel.child_token(),
            state: StdMutex::new(ManagedState {
                short_code: String::new(),
                viewer_code: None,
                status: SessionStatus::Waiting,
                created_at: now,
                last_seen: now,
                client_url: String::new(),
                viewer_url: None,
                password,
            }),
        });

        {
            let mut tables = self.tables.lock().expect("session tables lock");
            tables.by_id.insert(id.clone(), Arc::clone(&session));
        }

        self.spawn_negotiation(Arc::clone(&session), &params);

        let deadline = tokio::time::Instant::now() + SHORT_CODE_READY_TIMEOUT;
        while !session.has_short_code() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(READY_POLL_GAP).await;
        }

        Ok(SessionStartResult {
            summary: session.to_summary(),
            password: session.password(),
            public: params.public,
        })
    }

    fn spawn_negotiation(self: &Arc<Self>, session: Arc<ManagedSession>, params: &StartSessionParams) {
        let password = session.password();
        let config = HostSessionConfig {
            relay_url: params.relay_url.clone(),
            client_url_base: params.client_url_base.clone(),
            turn_servers: params.turn_servers.clone(),
            salt: session.salt,
            password,
            relay_ws: params.relay_ws,
        };

        let (ready_tx, ready_rx) = oneshot::channel::<ShortCodeReady>();
        let public = params.public;
        let manager = Arc::clone(self);
        let on_status = {
            let session = Arc::clone(&session);
            Arc::new(move |status: SessionStatus| session.set_status(status))
                as Arc<dyn Fn(SessionStatus) + Send + Sync>
        };

        let Some(bridge) = session.bridge.clone() else {
            return;
        };
        let negotiation_session = Arc::clone(&session);
        let negotiation_cancel = session.cancel.clone();
        tokio::spawn(async move {
            if let Err(err) =
                negotiate::run_host_negotiation(bridge, config, ready_tx, on_status, negotiation_cancel)
                    .await
            {
                log::warn!("session {} negotiation failed: {err}", negotiation_session.id);
                negotiation_session.set_status(SessionStatus::Disconnected);
            }
        });

        tokio::spawn(async move {
            let Ok(ready) = ready_rx.await else {
                return;
            };
            let (viewer_code, viewer_url) = if public {
                let viewer_code = format!("{}V", ready.short_code);
                let viewer_url = format!("{}/?c={}", client_url_base(&ready.client_url), viewer_code);
                (Some(viewer_code), Some(viewer_url))
            } else {
                (None, None)
            };
            session.apply_ready(ready, viewer_code, viewer_url);
            {
                let mut tables = manager.tables.lock().expect("session tables lock");
                tables
                    .by_code
                    .insert(session.short_code(), Arc::clone(&session));
            }
            let _ = manager.persist(&session);
        });
    }

    /// Looks a session up by id or short code and stops it: cancels its
    /// negotiation context, closes the bridge (terminating the shell
    /// unless it was only recovered), removes it from both maps, and
    /// deletes its persisted file.
    pub fn stop_session(&self, id_or_code: &str) -> Result<(), SessionError> {
        let session = {
            let mut tables = self.tables.lock().expect("session tables lock");
            let session = tables
                .by_id
                .remove(id_or_code)
                .or_else(|| tables.by_code.remove(id_or_code))
                .ok_or(SessionError::NotFound)?;
            tables.by_id.remove(&session.id);
            let code = session.short_code();
            if !code.is_empty() {
                tables.by_code.remove(&code);
            }
            session
        };

        session.cancel.cancel();
        if let Some(bridge) = session.bridge.clone() {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.close().await });
        }
        let _ = std::fs::remove_file(session_file_path(&session.id, &session.short_code()));
        Ok(())
    }

    /// Idempotent sweep of [`stop_session`] over every tracked session.
    pub fn stop_all_sessions(&self) {
        let ids: Vec<String> = {
            let tables = self.tables.lock().expect("session tables lock");
            tables.by_id.keys().cloned().collect()
        };
        for id in ids {
            let _ = self.stop_session(&id);
        }
    }

    /// Plugs an already-negotiated viewer `EncryptedChannel` into a
    /// session's bridge as a read-only fan-out sink. The viewer's own
    /// peer-connection negotiation happens outside this manager (driven by
    /// whatever front-end the viewer code/URL was handed to); this is only
    /// the handoff point once that channel is open.
    pub fn register_viewer_channel(
        &self,
        id_or_code: &str,
        channel: Arc<crate::channel::EncryptedChannel>,
    ) -> Result<(), SessionError> {
        let session = {
            let tables = self.tables.lock().expect("session tables lock");
            tables
                .by_id
                .get(id_or_code)
                .or_else(|| tables.by_code.get(id_or_code))
                .cloned()
                .ok_or(SessionError::NotFound)?
        };
        let Some(bridge) = session.bridge.clone() else {
            return Err(SessionError::NotFound);
        };
        tokio::spawn(async move { bridge.add_viewer(channel).await });
        Ok(())
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let tables = self.tables.lock().expect("session tables lock");
        tables.by_id.values().map(|s| s.to_summary()).collect()
    }

    /// Removes sessions whose status is `disconnected`/`recovered` and
    /// whose `last_seen` is older than `timeout` (default
    /// [`DEFAULT_IDLE_TIMEOUT`]).
    pub fn cleanup_idle_sessions(&self, timeout: Duration) {
        let now = Utc::now();
        let stale: Vec<String> = {
            let tables = self.tables.lock().expect("session tables lock");
            tables
                .by_id
                .values()
                .filter(|s| {
                    matches!(s.status(), SessionStatus::Disconnected | SessionStatus::Recovered)
                        && now
                            .signed_duration_since(s.last_seen())
                            .to_std()
                            .map(|age| age > timeout)
                            .unwrap_or(false)
                })
                .map(|s| s.id.clone())
                .collect()
        };
        for id in stale {
            let _ = self.stop_session(&id);
        }
    }

    /// Reads every persisted session file; reattaches to still-alive
    /// shells and drops the rest.
    pub fn load_from_disk(&self) {
        let Ok(dir) = state::sessions_dir() else {
            return;
        };
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(persisted) = serde_json::from_str::<PersistedSession>(&contents) else {
                let _ = std::fs::remove_file(&path);
                continue;
            };

            if !procutil::is_process_alive(persisted.shell_pid) {
                let _ = std::fs::remove_file(&path);
                continue;
            }

            match PtySession::reattach(&persisted.pty_path, persisted.shell_pid) {
                Ok((pty, reader)) => {
                    let bridge = Bridge::spawn(
                        pty,
                        reader,
                        None,
                        crate::pty::bridge::DEFAULT_BUFFER_MAX,
                    );
                    let now = Utc::now();
                    let session = Arc::new(ManagedSession {
                        id: persisted.id.clone(),
                        salt: persisted.salt,
                        shell: persisted.shell.clone(),
                        pty_path: persisted.pty_path.clone(),
                        shell_pid: persisted.shell_pid,
                        bridge: Some(bridge),
                        cancel: self.daemon_cancel.child_token(),
                        state: StdMutex::new(ManagedState {
                            short_code: persisted.short_code.clone(),
                            viewer_code: persisted.viewer_code.clone(),
                            status: SessionStatus::Recovered,
                            created_at: persisted.created_at,
                            last_seen: now,
                            client_url: persisted.client_url.clone(),
                            viewer_url: persisted.viewer_url.clone(),
                            password: String::new(),
                        }),
                    });
                    let mut tables = self.tables.lock().expect("session tables lock");
                    tables.by_id.insert(session.id.clone(), Arc::clone(&session));
                    if !persisted.short_code.is_empty() {
                        tables.by_code.insert(persisted.short_code.clone(), session);
                    }
                }
                Err(_) => {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
    }

    fn persist(&self, session: &Arc<ManagedSession>) -> anyhow::Result<()> {
        let persisted = session.to_persisted();
        let path = state::session_file_path(&persisted.short_code)?;
        let contents = serde_json::to_vec_pretty(&persisted)?;
        state::write_private_file(&path, &contents)
    }
}

fn generate_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn recording_path(session_id: &str) -> std::path::PathBuf {
    let dir = state::recordings_dir().unwrap_or_else(|_| std::env::temp_dir());
    let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!("{timestamp}_{session_id}.cast"))
}

fn session_file_path(id: &str, short_code: &str) -> std::path::PathBuf {
    let key = if short_code.is_empty() { id } else { short_code };
    state::session_file_path(key).unwrap_or_else(|_| std::path::PathBuf::from(key))
}

fn client_url_base(client_url: &str) -> String {
    client_url
        .rsplit_once("/?c=")
        .map(|(base, _)| base.to_string())
        .unwrap_or_else(|| client_url.to_string())
}
