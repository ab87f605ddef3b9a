//! The in-memory and on-disk shapes of a session's identity fields,
//! shared between a live `ManagedSession` and its persisted record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session, as observed by `session.list`/`daemon.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Connected,
    Disconnected,
    Recovered,
}

/// The on-disk record for one session: identical to the in-memory fields
/// minus `password`, which is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub id: String,
    pub short_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_code: Option<String>,
    pub salt: [u8; 16],
    pub shell: String,
    pub pty_path: String,
    pub shell_pid: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub client_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_url: Option<String>,
}

/// Summary row returned by `session.list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub short_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_code: Option<String>,
    pub status: SessionStatus,
    pub shell: String,
    pub shell_pid: u32,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub client_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_url: Option<String>,
}

/// Result of `session.start`: the summary plus the one-time fields an
/// operator needs to actually share the session — the password (generated
/// if the caller didn't supply one) and whether a public viewer was
/// provisioned. Never persisted and never returned by `session.list`,
/// unlike every other field here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartResult {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub password: String,
    pub public: bool,
}
