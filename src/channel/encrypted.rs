//! Wraps a [`PeerConnection`]'s data channel with encryption, message
//! typing, dual-key decryption, and ping/pong keepalive.
//!
//! Grounded on the heritage `WebRtcChannel`'s `Arc<Mutex<...>>` state
//! layout and single-ticker keepalive, generalized to the sum-type event
//! model called for in `SPEC_FULL.md` (§4.4 / REDESIGN FLAGS) instead of
//! the heritage's scattered `Option<Box<dyn Fn>>` callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::crypto;
use crate::protocol::frame::{self, Message};

use super::peer::PeerConnection;
use super::ChannelError;

const KEEPALIVE_TICK: Duration = Duration::from_secs(10);
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

/// Events the inbound pipeline delivers to the owner of an
/// [`EncryptedChannel`]. Replaces per-callback registration with a single
/// ordered event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptedChannelEvent {
    /// Decrypted PTY data, in either direction.
    Data(Vec<u8>),
    /// A resize request.
    Resize { rows: u16, cols: u16 },
    /// The peer closed the channel (either explicitly or the keepalive
    /// timed out).
    Closed,
}

enum KeepaliveState {
    Off,
    Running {
        handle: tokio::task::JoinHandle<()>,
        timeout_tx: Option<oneshot::Sender<()>>,
    },
}

/// An encrypted, typed, keepalive-monitored wrapper around one data
/// channel.
pub struct EncryptedChannel {
    peer: Arc<PeerConnection>,
    primary_key: [u8; crypto::KEY_LEN],
    alternate_key: Option<[u8; crypto::KEY_LEN]>,
    using_alternate: AtomicBool,
    closed: AtomicBool,
    last_pong: Mutex<Instant>,
    keepalive: Mutex<KeepaliveState>,
    events_tx: mpsc::UnboundedSender<EncryptedChannelEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<EncryptedChannelEvent>>,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EncryptedChannel {
    /// Wraps `peer`'s data channel with the given primary key and
    /// optional fallback key, and starts the inbound read loop.
    pub fn new(
        peer: Arc<PeerConnection>,
        primary_key: [u8; crypto::KEY_LEN],
        alternate_key: Option<[u8; crypto::KEY_LEN]>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            peer,
            primary_key,
            alternate_key,
            using_alternate: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_pong: Mutex::new(Instant::now()),
            keepalive: Mutex::new(KeepaliveState::Off),
            events_tx,
            events_rx: Mutex::new(events_rx),
            reader_task: Mutex::new(None),
        });
        let reader = spawn_reader(Arc::clone(&channel));
        // `reader_task` is only ever populated once, at construction time —
        // no other writer exists, so this lock never blocks.
        if let Ok(mut guard) = channel.reader_task.try_lock() {
            *guard = Some(reader);
        }
        channel
    }

    fn active_key(&self) -> [u8; crypto::KEY_LEN] {
        if self.using_alternate.load(Ordering::Relaxed) {
            self.alternate_key.unwrap_or(self.primary_key)
        } else {
            self.primary_key
        }
    }

    async fn send_message(&self, msg: &Message) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ChannelError::Closed);
        }
        let encoded = frame::encode(msg)
            .map_err(|e| ChannelError::SendFailed(format!("encode: {e}")))?;
        let sealed = crypto::encrypt(&self.active_key(), &encoded)
            .map_err(|e| ChannelError::SendFailed(format!("encrypt: {e}")))?;
        self.peer.send_data(&sealed).await
    }

    /// Sends raw PTY bytes (or controller keystrokes).
    pub async fn send_data(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.send_message(&Message::Data(bytes.to_vec())).await
    }

    /// Sends a terminal resize notification.
    pub async fn send_resize(&self, rows: u16, cols: u16) -> Result<(), ChannelError> {
        self.send_message(&Message::Resize { rows, cols }).await
    }

    /// Sends a keepalive ping.
    pub async fn send_ping(&self) -> Result<(), ChannelError> {
        self.send_message(&Message::Ping).await
    }

    async fn send_pong(&self) -> Result<(), ChannelError> {
        self.send_message(&Message::Pong).await
    }

    /// Sends a best-effort close frame, then closes the underlying
    /// channel. Never fails loudly: the peer may already be gone.
    pub async fn close(&self) {
        let _ = self.send_message(&Message::Close).await;
        self.closed.store(true, Ordering::Relaxed);
        self.stop_keepalive().await;
        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }
        self.peer.close().await;
        let _ = self.events_tx.send(EncryptedChannelEvent::Closed);
    }

    /// Awaits the next inbound event.
    pub async fn next_event(&self) -> Option<EncryptedChannelEvent> {
        self.events_rx.lock().await.recv().await
    }

    /// Starts the keepalive ticker if not already running; returns a
    /// one-shot receiver that fires when the peer is judged unresponsive.
    /// Idempotent and race-free under concurrent calls.
    pub async fn start_keepalive(self: &Arc<Self>) -> oneshot::Receiver<()> {
        let mut state = self.keepalive.lock().await;
        let (tx, rx) = oneshot::channel();
        match &mut *state {
            KeepaliveState::Running { timeout_tx, .. } => {
                *timeout_tx = Some(tx);
            }
            KeepaliveState::Off => {
                *self.last_pong.lock().await = Instant::now();
                let handle = tokio::spawn(keepalive_ticker(Arc::clone(self)));
                *state = KeepaliveState::Running {
                    handle,
                    timeout_tx: Some(tx),
                };
            }
        }
        rx
    }

    /// Stops the keepalive ticker; a no-op if it is already stopped.
    pub async fn stop_keepalive(&self) {
        let mut state = self.keepalive.lock().await;
        if let KeepaliveState::Running { handle, timeout_tx } =
            std::mem::replace(&mut *state, KeepaliveState::Off)
        {
            handle.abort();
            drop(timeout_tx);
        }
    }
}

async fn keepalive_ticker(channel: Arc<EncryptedChannel>) {
    let mut interval = tokio::time::interval(KEEPALIVE_TICK);
    interval.tick().await; // first tick fires immediately; skip it
    loop {
        interval.tick().await;
        let _ = channel.send_ping().await;
        let elapsed = channel.last_pong.lock().await.elapsed();
        if elapsed > PONG_TIMEOUT {
            let mut state = channel.keepalive.lock().await;
            if let KeepaliveState::Running { timeout_tx, .. } = &mut *state {
                if let Some(tx) = timeout_tx.take() {
                    let _ = tx.send(());
                }
            }
            *state = KeepaliveState::Off;
            return;
        }
    }
}

fn spawn_reader(channel: Arc<EncryptedChannel>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(sealed) = channel.peer.recv_data().await else {
                break;
            };
            handle_inbound(&channel, &sealed).await;
        }
    })
}

async fn handle_inbound(channel: &Arc<EncryptedChannel>, sealed: &[u8]) {
    let plaintext = match crypto::decrypt(&channel.primary_key, sealed) {
        Ok(pt) => pt,
        Err(_) => match channel.alternate_key {
            Some(alt) => match crypto::decrypt(&alt, sealed) {
                Ok(pt) => {
                    channel.using_alternate.store(true, Ordering::Relaxed);
                    pt
                }
                Err(_) => return,
            },
            None => return,
        },
    };

    let Ok(msg) = frame::decode(&plaintext) else {
        return;
    };

    match msg {
        Message::Data(bytes) => {
            let _ = channel.events_tx.send(EncryptedChannelEvent::Data(bytes));
        }
        Message::Resize { rows, cols } => {
            let _ = channel
                .events_tx
                .send(EncryptedChannelEvent::Resize { rows, cols });
        }
        Message::Ping => {
            let _ = channel.send_pong().await;
        }
        Message::Pong => {
            *channel.last_pong.lock().await = Instant::now();
        }
        Message::Close => {
            if !channel.closed.swap(true, Ordering::Relaxed) {
                channel.stop_keepalive().await;
                let _ = channel.events_tx.send(EncryptedChannelEvent::Closed);
            }
        }
    }
}
