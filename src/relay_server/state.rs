//! In-memory session table for the relay: `code -> Session{offer, answer?,
//! salt, ws subscribers, created, last_activity}`, guarded by one lock, per
//! spec §4.7.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch, Mutex};

use crate::signaling::random_code;

pub use crate::signaling::relay_ws::RelayMessage as WireMessage;

const CODE_LEN: usize = 8;
const WS_CHANNEL_CAPACITY: usize = 16;
/// How long a session is kept alive after its answer is posted, to let the
/// controller finish reading it before the slot is freed.
const ANSWER_GRACE_PERIOD: Duration = Duration::from_secs(5);

struct Session {
    offer_sdp: String,
    salt: String,
    answer_tx: watch::Sender<Option<String>>,
    answer_rx: watch::Receiver<Option<String>>,
    ws_tx: Option<broadcast::Sender<WireMessage>>,
    created: Instant,
    last_activity: Instant,
    /// When a successful answer was most recently posted, so the sweeper
    /// can free the session ~5s later instead of waiting out the full
    /// inactivity timeout (spec §4.7's post-handshake grace period).
    answer_posted_at: Option<Instant>,
}

impl Session {
    fn new(offer_sdp: String, salt: String) -> Self {
        let (answer_tx, answer_rx) = watch::channel(None);
        Self {
            offer_sdp,
            salt,
            answer_tx,
            answer_rx,
            ws_tx: None,
            created: Instant::now(),
            last_activity: Instant::now(),
            answer_posted_at: None,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Relay-wide configuration (distinct from the mutable session table).
#[derive(Clone)]
pub struct RelayState {
    client_url_base: String,
}

impl RelayState {
    pub fn new(client_url_base: String) -> Self {
        Self { client_url_base }
    }
}

/// The actual mutable session table, cheaply cloneable (an `Arc` inside).
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<HashMap<String, Session>>>,
    config: RelayState,
}

impl SharedState {
    pub fn new(config: RelayState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub fn client_url_base(&self) -> &str {
        &self.config.client_url_base
    }

    /// Generates a fresh, currently-unique code and stores a new session
    /// under it. Returns `(code, expires_in_seconds)`.
    pub async fn create_session(&self, sdp: String, salt: String) -> (String, u64) {
        let mut table = self.inner.lock().await;
        let code = loop {
            let candidate = random_code(CODE_LEN);
            if !table.contains_key(&candidate) {
                break candidate;
            }
        };
        table.insert(code.clone(), Session::new(sdp, salt));
        (code, INACTIVITY_SECONDS)
    }

    pub async fn get_offer(&self, code: &str) -> Option<(String, String)> {
        let mut table = self.inner.lock().await;
        let session = table.get_mut(code)?;
        session.touch();
        Some((session.offer_sdp.clone(), session.salt.clone()))
    }

    pub async fn replace_offer(&self, code: &str, sdp: String, salt: Option<String>) -> bool {
        let mut table = self.inner.lock().await;
        let Some(session) = table.get_mut(code) else {
            return false;
        };
        session.offer_sdp = sdp;
        if let Some(salt) = salt {
            session.salt = salt;
        }
        let _ = session.answer_tx.send(None);
        session.answer_posted_at = None;
        session.touch();
        true
    }

    pub async fn heartbeat(&self, code: &str) -> bool {
        let mut table = self.inner.lock().await;
        let Some(session) = table.get_mut(code) else {
            return false;
        };
        session.touch();
        true
    }

    /// Stores the answer (last-writer-wins) and wakes any long-poller.
    pub async fn post_answer(&self, code: &str, sdp: String) -> bool {
        let mut table = self.inner.lock().await;
        let Some(session) = table.get_mut(code) else {
            return false;
        };
        session.touch();
        session.answer_posted_at = Some(Instant::now());
        let _ = session.answer_tx.send(Some(sdp.clone()));
        if let Some(ws_tx) = &session.ws_tx {
            let _ = ws_tx.send(WireMessage {
                kind: "answer".to_string(),
                session_id: Some(code.to_string()),
                role: None,
                sdp: Some(sdp),
                salt: None,
                error: None,
            });
        }
        true
    }

    /// Returns the answer immediately if present; otherwise waits up to 30s.
    pub async fn wait_for_answer(&self, code: &str) -> Option<String> {
        let mut rx = {
            let mut table = self.inner.lock().await;
            let session = table.get_mut(code)?;
            session.touch();
            if let Some(sdp) = session.answer_rx.borrow().clone() {
                return Some(sdp);
            }
            session.answer_rx.clone()
        };

        let result = tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                if let Some(sdp) = rx.borrow().clone() {
                    return Some(sdp);
                }
            }
        })
        .await;

        result.ok().flatten()
    }

    /// Registers a WebSocket subscriber for `code`, creating its broadcast
    /// channel on first use.
    pub async fn subscribe(&self, code: &str) -> Option<broadcast::Receiver<WireMessage>> {
        let mut table = self.inner.lock().await;
        let session = table.get_mut(code)?;
        let tx = session
            .ws_tx
            .get_or_insert_with(|| broadcast::channel(WS_CHANNEL_CAPACITY).0);
        Some(tx.subscribe())
    }

    /// Routes an inbound WebSocket message: an `offer` updates the stored
    /// offer and rebroadcasts it to the host's subscribers; an `answer`
    /// stores it (same path as `post_answer`) and rebroadcasts.
    pub async fn handle_ws_message(&self, code: &str, msg: WireMessage) {
        match msg.kind.as_str() {
            "offer" => {
                if let Some(sdp) = msg.sdp.clone() {
                    self.replace_offer(code, sdp, msg.salt.clone()).await;
                }
                self.rebroadcast(code, msg).await;
            }
            "answer" => {
                if let Some(sdp) = msg.sdp.clone() {
                    self.post_answer(code, sdp).await;
                }
            }
            "register" => {
                // Registration just ensures a broadcast channel exists;
                // `subscribe` already created it.
            }
            _ => {}
        }
    }

    async fn rebroadcast(&self, code: &str, msg: WireMessage) {
        let table = self.inner.lock().await;
        if let Some(session) = table.get(code) {
            if let Some(tx) = &session.ws_tx {
                let _ = tx.send(msg);
            }
        }
    }

    /// Removes sessions whose `last_activity` is older than `timeout`, or
    /// whose answer was posted more than [`ANSWER_GRACE_PERIOD`] ago (the
    /// handshake is done; free the slot rather than hold it idle).
    pub async fn sweep_inactive(&self, timeout: Duration) {
        let mut table = self.inner.lock().await;
        table.retain(|_, session| {
            let past_grace = session
                .answer_posted_at
                .is_some_and(|t| t.elapsed() > ANSWER_GRACE_PERIOD);
            !past_grace && session.last_activity.elapsed() <= timeout
        });
    }

    /// Number of live sessions (test/introspection helper).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    #[cfg(test)]
    pub async fn created_at(&self, code: &str) -> Option<Instant> {
        self.inner.lock().await.get(code).map(|s| s.created)
    }
}

const INACTIVITY_SECONDS: u64 = 5 * 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_fetch_session() {
        let state = SharedState::new(RelayState::new("https://tt.example".to_string()));
        let (code, _expires) = state.create_session("sdp-offer".to_string(), "c2FsdA==".to_string()).await;
        let (sdp, salt) = state.get_offer(&code).await.unwrap();
        assert_eq!(sdp, "sdp-offer");
        assert_eq!(salt, "c2FsdA==");
    }

    #[tokio::test]
    async fn test_answer_wakes_waiter_immediately_when_already_posted() {
        let state = SharedState::new(RelayState::new("https://tt.example".to_string()));
        let (code, _) = state.create_session("offer".to_string(), "salt".to_string()).await;
        state.post_answer(&code, "answer-sdp".to_string()).await;
        let answer = state.wait_for_answer(&code).await;
        assert_eq!(answer.as_deref(), Some("answer-sdp"));
    }

    #[tokio::test]
    async fn test_sweep_removes_inactive_sessions() {
        let state = SharedState::new(RelayState::new("https://tt.example".to_string()));
        let (code, _) = state.create_session("offer".to_string(), "salt".to_string()).await;
        state.sweep_inactive(Duration::from_secs(0)).await;
        assert!(state.get_offer(&code).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_leaves_recently_active_sessions_alone() {
        let state = SharedState::new(RelayState::new("https://tt.example".to_string()));
        let (code, _) = state.create_session("offer".to_string(), "salt".to_string()).await;
        state.sweep_inactive(Duration::from_secs(300)).await;
        assert!(state.get_offer(&code).await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_evicts_session_past_the_post_answer_grace_period() {
        let state = SharedState::new(RelayState::new("https://tt.example".to_string()));
        let (code, _) = state.create_session("offer".to_string(), "salt".to_string()).await;
        state.post_answer(&code, "answer-sdp".to_string()).await;

        {
            let mut table = state.inner.lock().await;
            let session = table.get_mut(&code).unwrap();
            session.answer_posted_at = Some(Instant::now() - ANSWER_GRACE_PERIOD - Duration::from_secs(1));
        }

        state.sweep_inactive(Duration::from_secs(300)).await;
        assert!(state.get_offer(&code).await.is_none());
    }

    #[tokio::test]
    async fn test_codes_are_unique_across_many_sessions() {
        let state = SharedState::new(RelayState::new("https://tt.example".to_string()));
        let mut codes = std::collections::HashSet::new();
        for _ in 0..500 {
            let (code, _) = state.create_session("offer".to_string(), "salt".to_string()).await;
            assert!(codes.insert(code), "code collision");
        }
    }
}
