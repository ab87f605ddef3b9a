//! Everything to do with one peer's encrypted data channel: the transport
//! wrapper ([`peer`]) and the encryption/framing/keepalive layer on top of
//! it ([`encrypted`]).

pub mod encrypted;
pub mod peer;

pub use encrypted::{EncryptedChannel, EncryptedChannelEvent};
pub use peer::{IceServerConfig, PeerConnection, PeerEvent, PeerState};

/// Errors surfaced by the channel layer.
#[derive(Debug)]
pub enum ChannelError {
    /// Failed to establish or negotiate the underlying connection.
    ConnectionFailed(String),
    /// A send on the underlying transport failed.
    SendFailed(String),
    /// Waiting for a result (ICE gathering, data channel open) timed out.
    Timeout,
    /// The channel has already been closed.
    Closed,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "connection failed: {msg}"),
            Self::SendFailed(msg) => write!(f, "send failed: {msg}"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for ChannelError {}
