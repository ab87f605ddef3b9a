//! Rendezvous: getting an SDP offer from the host to a controller and an
//! SDP answer back, by one of three coordinated methods.
//!
//! Grounded on `channel/webrtc.rs::fetch_ice_config`'s `reqwest` usage and
//! `relay/connection.rs`'s long-poll/backoff shape for the short-code path,
//! `ws.rs`'s `tokio-tungstenite` client loop for the relay-websocket path,
//! and `tui/qr.rs` for the manual/offline path's QR rendering.

pub mod manual;
pub mod relay_ws;
pub mod short_code;

use std::fmt;

/// Selects which signaling path a session negotiates over, matching the
/// priority order in spec §4.6: forced-manual, then short-code (if a relay
/// URL is configured), then manual fallback. The relay-websocket path is an
/// explicit alternative a caller can select instead of short-code polling.
#[derive(Debug, Clone)]
pub enum SignalingMode {
    ShortCode { relay_url: String },
    RelayWebSocket { relay_url: String },
    Manual,
}

/// Outcome of a host-side negotiation: enough to populate
/// `ManagedSession`'s short-code/viewer fields and the persisted record.
#[derive(Debug, Clone)]
pub struct HostNegotiation {
    pub short_code: String,
    pub expires_in: u64,
    pub client_url: String,
}

#[derive(Debug)]
pub enum SignalingError {
    Http(String),
    Timeout,
    RelayRejected(String),
    InvalidResponse(String),
    Cancelled,
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(msg) => write!(f, "signaling http error: {msg}"),
            Self::Timeout => write!(f, "signaling timed out"),
            Self::RelayRejected(msg) => write!(f, "relay rejected request: {msg}"),
            Self::InvalidResponse(msg) => write!(f, "invalid relay response: {msg}"),
            Self::Cancelled => write!(f, "signaling cancelled"),
        }
    }
}

impl std::error::Error for SignalingError {}

/// Generates an `n`-character token from the short-code alphabet
/// (`23456789ABCDEFGHJKLMNPQRSTUVWXYZ`, 31 symbols, ambiguity-free).
pub fn random_code(n: usize) -> String {
    const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
    use rand::RngCore;
    let mut rng = rand::rng();
    (0..n)
        .map(|_| {
            let idx = (rng.next_u32() as usize) % ALPHABET.len();
            ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_code_uses_only_alphabet_symbols() {
        const ALPHABET: &str = "23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
        let code = random_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| ALPHABET.contains(c)));
    }
}
