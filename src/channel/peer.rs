//! The underlying transport: gathers network candidates, negotiates SDP,
//! and exposes data channel lifecycle events and connection state.
//!
//! Grounded on the `rustrtc`-based peer connection handling from the
//! heritage WebRTC channel, generalized so either side (the host, which
//! creates the data channel, or the controller, which receives it) can
//! drive the same wrapper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustrtc::transports::sctp::DataChannel;
use rustrtc::{
    DataChannelEvent, IceCredentialType, IceServer, PeerConnection as RtcPeerConnection,
    PeerConnectionEvent, PeerConnectionState, RtcConfiguration, SdpType, SessionDescription,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;

use super::ChannelError;

/// How long to wait for ICE candidate gathering before giving up on
/// `create_offer`/`create_answer`.
const GATHERING_TIMEOUT: Duration = Duration::from_secs(30);

/// A single configured TURN/STUN entry.
#[derive(Debug, Clone)]
pub struct IceServerConfig {
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Connection state transitions surfaced to callers of [`PeerConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events emitted by the peer connection's background event loop.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A data channel became available (controller side: the remote peer
    /// created it; it is never emitted on the side that called
    /// `create_data_channel` itself).
    DataChannelOpen,
    /// The connection's overall state changed.
    StateChanged(PeerState),
}

fn default_stun_servers() -> Vec<IceServer> {
    vec![IceServer {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: None,
        credential: None,
        credential_type: IceCredentialType::Password,
    }]
}

/// Wraps a `rustrtc::PeerConnection` plus the single data channel this
/// crate ever opens per peer connection.
pub struct PeerConnection {
    pc: RtcPeerConnection,
    data_channel: Arc<Mutex<Option<Arc<DataChannel>>>>,
    channel_id: Arc<Mutex<Option<u16>>>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<PeerEvent>>,
    state_rx: watch::Receiver<PeerState>,
    event_loop: Mutex<Option<tokio::task::JoinHandle<()>>>,
    dc_opened: Arc<AtomicBool>,
    data_tx: mpsc::UnboundedSender<Vec<u8>>,
    data_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl PeerConnection {
    /// Builds a peer connection configured with the default STUN list plus
    /// any caller-supplied TURN servers (see `TURN_URL`/`TURN_USERNAME`/
    /// `TURN_PASSWORD`).
    pub fn new(turn_servers: Vec<IceServerConfig>) -> Result<Self, ChannelError> {
        let mut ice_servers = default_stun_servers();
        for turn in turn_servers {
            ice_servers.push(IceServer {
                urls: vec![turn.url],
                username: turn.username,
                credential: turn.credential,
                credential_type: IceCredentialType::Password,
            });
        }

        let config = RtcConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = RtcPeerConnection::new(config);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PeerState::New);

        let data_channel = Arc::new(Mutex::new(None));
        let channel_id = Arc::new(Mutex::new(None));
        let dc_opened = Arc::new(AtomicBool::new(false));
        let (data_tx, data_rx) = mpsc::unbounded_channel();

        let handle = spawn_event_loop(
            pc.clone(),
            Arc::clone(&data_channel),
            Arc::clone(&channel_id),
            Arc::clone(&dc_opened),
            events_tx.clone(),
            state_tx,
            data_tx.clone(),
        );

        Ok(Self {
            pc,
            data_channel,
            channel_id,
            events_tx,
            events_rx: Mutex::new(events_rx),
            state_rx,
            event_loop: Mutex::new(Some(handle)),
            dc_opened,
            data_tx,
            data_rx: Mutex::new(data_rx),
        })
    }

    /// Creates the one data channel this crate ever opens: ordered,
    /// reliable, host side only.
    pub fn create_data_channel(&self, label: &str) -> Result<(), ChannelError> {
        let dc = self
            .pc
            .create_data_channel(label)
            .map_err(|e| ChannelError::ConnectionFailed(format!("create_data_channel: {e}")))?;
        let channel_id = Arc::clone(&self.channel_id);
        let data_channel = Arc::clone(&self.data_channel);
        let events_tx = self.events_tx.clone();
        let dc_opened = Arc::clone(&self.dc_opened);
        let data_tx = self.data_tx.clone();
        tokio::spawn(async move {
            *channel_id.lock().await = Some(dc.id);
            let dc = Arc::clone(&dc);
            *data_channel.lock().await = Some(Arc::clone(&dc));
            dc_opened.store(true, Ordering::Relaxed);
            let _ = events_tx.send(PeerEvent::DataChannelOpen);
            spawn_dc_reader(dc, data_tx);
        });
        Ok(())
    }

    /// Awaits the next raw payload received on the data channel.
    pub async fn recv_data(&self) -> Option<Vec<u8>> {
        self.data_rx.lock().await.recv().await
    }

    /// Creates a local offer, waits for ICE gathering to settle, and
    /// returns the final SDP text.
    pub async fn create_offer(&self) -> Result<String, ChannelError> {
        let offer = timeout(GATHERING_TIMEOUT, self.pc.create_offer())
            .await
            .map_err(|_| ChannelError::Timeout)?
            .map_err(|e| ChannelError::ConnectionFailed(format!("create_offer: {e}")))?;
        self.pc
            .set_local_description(offer.clone())
            .map_err(|e| ChannelError::ConnectionFailed(format!("set_local_description: {e}")))?;
        Ok(offer.to_sdp_string())
    }

    /// Consumes a remote offer and produces a local answer, waiting for
    /// ICE gathering to settle.
    pub async fn create_answer(&self, remote_offer_sdp: &str) -> Result<String, ChannelError> {
        let offer = SessionDescription::parse(SdpType::Offer, remote_offer_sdp)
            .map_err(|e| ChannelError::ConnectionFailed(format!("invalid offer: {e}")))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(format!("set_remote_description: {e}")))?;

        let answer = timeout(GATHERING_TIMEOUT, self.pc.create_answer())
            .await
            .map_err(|_| ChannelError::Timeout)?
            .map_err(|e| ChannelError::ConnectionFailed(format!("create_answer: {e}")))?;
        self.pc
            .set_local_description(answer.clone())
            .map_err(|e| ChannelError::ConnectionFailed(format!("set_local_description: {e}")))?;
        Ok(answer.to_sdp_string())
    }

    /// Consumes the remote answer to a locally-created offer.
    pub async fn set_remote_description(&self, sdp: &str) -> Result<(), ChannelError> {
        let answer = SessionDescription::parse(SdpType::Answer, sdp)
            .map_err(|e| ChannelError::ConnectionFailed(format!("invalid answer: {e}")))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(format!("set_remote_description: {e}")))
    }

    /// Sends raw bytes over the data channel; fails if it is not open yet.
    pub async fn send_data(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let channel_id = self
            .channel_id
            .lock()
            .await
            .ok_or(ChannelError::Closed)?;
        self.pc
            .send_data(channel_id, bytes)
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    /// Awaits the next peer-connection-level event.
    pub async fn next_event(&self) -> Option<PeerEvent> {
        self.events_rx.lock().await.recv().await
    }

    /// Returns a watch receiver observing connection state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<PeerState> {
        self.state_rx.clone()
    }

    /// Current connection state.
    pub fn state(&self) -> PeerState {
        *self.state_rx.borrow()
    }

    /// Closes the underlying transport and stops the event loop.
    pub async fn close(&self) {
        if let Some(handle) = self.event_loop.lock().await.take() {
            handle.abort();
        }
        self.pc.close();
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_event_loop(
    pc: RtcPeerConnection,
    data_channel: Arc<Mutex<Option<Arc<DataChannel>>>>,
    channel_id: Arc<Mutex<Option<u16>>>,
    dc_opened: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    state_tx: watch::Sender<PeerState>,
    data_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> tokio::task::JoinHandle<()> {
    let mut peer_state_rx = pc.subscribe_peer_state();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = pc.recv() => {
                    match event {
                        Some(PeerConnectionEvent::DataChannel(dc)) => {
                            *channel_id.lock().await = Some(dc.id);
                            *data_channel.lock().await = Some(Arc::clone(&dc));
                            dc_opened.store(true, Ordering::Relaxed);
                            let _ = events_tx.send(PeerEvent::DataChannelOpen);
                            spawn_dc_reader(dc, data_tx.clone());
                        }
                        Some(PeerConnectionEvent::Track(_)) => {}
                        None => {
                            let _ = state_tx.send(PeerState::Closed);
                            break;
                        }
                    }
                }
                changed = peer_state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let mapped = match *peer_state_rx.borrow() {
                        PeerConnectionState::New => PeerState::New,
                        PeerConnectionState::Connecting => PeerState::Connecting,
                        PeerConnectionState::Connected => PeerState::Connected,
                        PeerConnectionState::Disconnected => PeerState::Disconnected,
                        PeerConnectionState::Failed => PeerState::Failed,
                        PeerConnectionState::Closed => PeerState::Closed,
                    };
                    let _ = state_tx.send(mapped);
                    let _ = events_tx.send(PeerEvent::StateChanged(mapped));
                }
            }
        }
    })
}

/// Reads messages off one data channel and forwards payloads to the
/// encrypted channel above; exits (and drops `tx`) on close.
fn spawn_dc_reader(dc: Arc<DataChannel>, tx: mpsc::UnboundedSender<Vec<u8>>) {
    tokio::spawn(async move {
        loop {
            match dc.recv().await {
                Some(DataChannelEvent::Message(data)) => {
                    if tx.send(data).is_err() {
                        break;
                    }
                }
                Some(DataChannelEvent::Open) => {}
                Some(DataChannelEvent::Close) | None => break,
            }
        }
    });
}
