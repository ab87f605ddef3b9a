//! Drives one session's controller negotiation: peer connection creation,
//! short-code (or manual) signaling, and wiring the resulting encrypted
//! channel up as the bridge's primary sender.
//!
//! Viewer connections are provisioned (`viewer_code`/`viewer_url`) by the
//! session manager but their own peer-connection negotiation is driven by
//! whatever front-end accepts them — the wire contract is the one fixed
//! point (spec §1 lists the browser front-end as an external collaborator);
//! once a viewer's `EncryptedChannel` is established it is handed to
//! `SessionManager::register_viewer_channel`, which plugs it into the same
//! `Bridge::add_viewer` this module already relies on for the controller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::channel::{EncryptedChannel, IceServerConfig, PeerConnection, PeerEvent, PeerState};
use crate::crypto;
use crate::pty::bridge::Bridge;
use crate::signaling::relay_ws::{RelaySocket, Role};
use crate::signaling::{short_code, SignalingError};

use super::record::SessionStatus;

/// Bounded wait for the data channel to actually open after answer
/// exchange, before giving up on this negotiation attempt.
const DATA_CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection attempts for the relay-websocket answer path before giving up.
const RELAY_WS_CONNECT_ATTEMPTS: u32 = 5;

pub struct HostSessionConfig {
    pub relay_url: Option<String>,
    pub client_url_base: String,
    pub turn_servers: Vec<IceServerConfig>,
    pub salt: [u8; 16],
    pub password: String,
    /// Wait for the answer over the relay's WebSocket push instead of
    /// long-polling `GET /session/{code}/answer` (spec §4.6's alternative
    /// signaling path). The offer is still posted over HTTP either way —
    /// the relay only accepts WebSocket registration for a code that
    /// already has a session row.
    pub relay_ws: bool,
}

/// Delivered once the short code is known, matching spec §4.9 step 4:
/// "populate the session state, publish to `by_code`, persist the session
/// file, and signal a one-slot short-code-ready channel."
pub struct ShortCodeReady {
    pub short_code: String,
    pub expires_in: u64,
    pub client_url: String,
}

#[derive(Debug)]
pub enum NegotiationError {
    Signaling(SignalingError),
    Peer(String),
    Cancelled,
}

impl std::fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signaling(e) => write!(f, "signaling failed: {e}"),
            Self::Peer(e) => write!(f, "peer connection failed: {e}"),
            Self::Cancelled => write!(f, "negotiation cancelled"),
        }
    }
}

impl std::error::Error for NegotiationError {}

/// Runs the full host-side negotiation for one session's primary
/// controller connection: creates the peer and data channel, publishes the
/// offer (short-code path), waits for the answer, waits for the data
/// channel to open, and wires an `EncryptedChannel` as the bridge's
/// primary. Reports transitions via `on_status`.
pub async fn run_host_negotiation(
    bridge: Arc<Bridge>,
    config: HostSessionConfig,
    ready_tx: oneshot::Sender<ShortCodeReady>,
    on_status: Arc<dyn Fn(SessionStatus) + Send + Sync>,
    cancel: CancellationToken,
) -> Result<(), NegotiationError> {
    let peer = Arc::new(
        PeerConnection::new(config.turn_servers).map_err(|e| NegotiationError::Peer(e.to_string()))?,
    );
    peer.create_data_channel("primary")
        .map_err(|e| NegotiationError::Peer(e.to_string()))?;

    let offer_sdp = peer
        .create_offer()
        .await
        .map_err(|e| NegotiationError::Peer(e.to_string()))?;

    let Some(relay_url) = config.relay_url.clone() else {
        // Manual/offline path: print the compact offer, block for the
        // operator's pasted answer.
        let answer_sdp = tokio::task::spawn_blocking({
            let sdp = offer_sdp.clone();
            let salt = config.salt;
            move || crate::signaling::manual::exchange_offer_for_answer(&sdp, &salt)
        })
        .await
        .map_err(|e| NegotiationError::Peer(e.to_string()))?
        .map_err(|e| NegotiationError::Peer(e.to_string()))?;

        peer.set_remote_description(&answer_sdp)
            .await
            .map_err(|e| NegotiationError::Peer(e.to_string()))?;

        return finish_negotiation(bridge, peer, config, on_status, cancel).await;
    };

    let client = reqwest::Client::new();
    let negotiation = short_code::create_session(
        &client,
        &relay_url,
        &config.client_url_base,
        &offer_sdp,
        &config.salt,
    )
    .await
    .map_err(NegotiationError::Signaling)?;

    let _ = ready_tx.send(ShortCodeReady {
        short_code: negotiation.short_code.clone(),
        expires_in: negotiation.expires_in,
        client_url: negotiation.client_url,
    });

    let answer_sdp = if config.relay_ws {
        tokio::select! {
            result = wait_for_answer_via_ws(&relay_url, &negotiation.short_code, &cancel) => result?,
            () = cancel.cancelled() => return Err(NegotiationError::Cancelled),
        }
    } else {
        tokio::select! {
            result = short_code::poll_for_answer(&client, &relay_url, &negotiation.short_code, Duration::from_secs(300)) => {
                result.map_err(NegotiationError::Signaling)?
            }
            () = cancel.cancelled() => return Err(NegotiationError::Cancelled),
        }
    };

    peer.set_remote_description(&answer_sdp)
        .await
        .map_err(|e| NegotiationError::Peer(e.to_string()))?;

    finish_negotiation(bridge, peer, config, on_status, cancel).await
}

/// Registers as the host on the relay's WebSocket and waits for the
/// `answer` message it pushes once a controller posts one, rather than
/// long-polling HTTP. The session row must already exist (created by
/// [`short_code::create_session`]) since `subscribe` looks it up by code.
async fn wait_for_answer_via_ws(
    relay_url: &str,
    code: &str,
    cancel: &CancellationToken,
) -> Result<String, NegotiationError> {
    let mut socket = RelaySocket::connect_with_retry(
        relay_url,
        code,
        Role::Host,
        RELAY_WS_CONNECT_ATTEMPTS,
        cancel,
    )
    .await
    .map_err(NegotiationError::Signaling)?;

    loop {
        let msg = socket.recv().await.map_err(NegotiationError::Signaling)?;
        if msg.kind == "answer" {
            if let Some(sdp) = msg.sdp {
                return Ok(sdp);
            }
        }
    }
}

async fn finish_negotiation(
    bridge: Arc<Bridge>,
    peer: Arc<PeerConnection>,
    config: HostSessionConfig,
    on_status: Arc<dyn Fn(SessionStatus) + Send + Sync>,
    cancel: CancellationToken,
) -> Result<(), NegotiationError> {
    wait_for_data_channel(&peer, &cancel).await?;

    let primary_key = crypto::derive_key(&config.password, &config.salt)
        .map_err(|e| NegotiationError::Peer(e.to_string()))?;
    let alternate_key = crypto::derive_key_fallback(&config.password, &config.salt);

    let channel = EncryptedChannel::new(Arc::clone(&peer), primary_key, Some(alternate_key));
    bridge.set_primary(channel.clone()).await;
    on_status(SessionStatus::Connected);

    let timeout_rx = channel.start_keepalive().await;
    spawn_inbound_pump(Arc::clone(&bridge), Arc::clone(&channel), Arc::clone(&on_status));
    spawn_timeout_watcher(timeout_rx, Arc::clone(&on_status), cancel.clone());
    spawn_state_watcher(peer, on_status, cancel);

    Ok(())
}

async fn wait_for_data_channel(
    peer: &Arc<PeerConnection>,
    cancel: &CancellationToken,
) -> Result<(), NegotiationError> {
    tokio::select! {
        result = tokio::time::timeout(DATA_CHANNEL_OPEN_TIMEOUT, async {
            loop {
                match peer.next_event().await {
                    Some(PeerEvent::DataChannelOpen) => return Ok(()),
                    Some(PeerEvent::StateChanged(PeerState::Failed | PeerState::Closed)) => {
                        return Err(NegotiationError::Peer("peer closed before data channel opened".to_string()));
                    }
                    Some(_) => continue,
                    None => return Err(NegotiationError::Peer("peer event stream closed".to_string())),
                }
            }
        }) => result.map_err(|_| NegotiationError::Peer("timed out waiting for data channel".to_string()))?,
        () = cancel.cancelled() => Err(NegotiationError::Cancelled),
    }
}

fn spawn_inbound_pump(
    bridge: Arc<Bridge>,
    channel: Arc<EncryptedChannel>,
    on_status: Arc<dyn Fn(SessionStatus) + Send + Sync>,
) {
    tokio::spawn(async move {
        use crate::channel::EncryptedChannelEvent;
        while let Some(event) = channel.next_event().await {
            match event {
                EncryptedChannelEvent::Data(bytes) => {
                    let _ = bridge.write_input(&bytes).await;
                }
                EncryptedChannelEvent::Resize { rows, cols } => {
                    let _ = bridge.resize(rows, cols).await;
                }
                EncryptedChannelEvent::Closed => {
                    on_status(SessionStatus::Disconnected);
                    break;
                }
            }
        }
    });
}

fn spawn_timeout_watcher(
    timeout_rx: oneshot::Receiver<()>,
    on_status: Arc<dyn Fn(SessionStatus) + Send + Sync>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = timeout_rx => on_status(SessionStatus::Disconnected),
            () = cancel.cancelled() => {}
        }
    });
}

fn spawn_state_watcher(
    peer: Arc<PeerConnection>,
    on_status: Arc<dyn Fn(SessionStatus) + Send + Sync>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut state_rx = peer.state_receiver();
        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    match *state_rx.borrow() {
                        PeerState::Disconnected | PeerState::Failed | PeerState::Closed => {
                            on_status(SessionStatus::Disconnected);
                        }
                        PeerState::Connected => on_status(SessionStatus::Connected),
                        _ => {}
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    });
}
