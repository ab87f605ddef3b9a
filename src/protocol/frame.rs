//! Fixed binary framing for the messages exchanged over an encrypted
//! channel: `type(1) || length_be16(2) || payload(length)`.
//!
//! Producers never truncate an oversize payload; they reject it. This is
//! a deliberate divergence from any heritage framing code that silently
//! truncates at 64 KiB — see the design notes in `SPEC_FULL.md`.

use std::fmt;
use std::io::Read;

/// Largest payload `encode` will accept, per the wire format.
pub const MAX_PAYLOAD_SIZE: usize = 65_535;

/// Ceiling on inflated output size, to bound a maliciously crafted
/// `data_compressed` frame.
const MAX_INFLATE_SIZE: usize = 10 * 1024 * 1024;

/// Minimum size below which compression is even attempted.
const COMPRESSION_THRESHOLD: usize = 128;

const TYPE_DATA: u8 = 0x01;
const TYPE_RESIZE: u8 = 0x02;
const TYPE_PING: u8 = 0x03;
const TYPE_PONG: u8 = 0x04;
const TYPE_CLOSE: u8 = 0x05;
const TYPE_DATA_COMPRESSED: u8 = 0x10;

/// A single logical protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Raw PTY output or controller keystrokes.
    Data(Vec<u8>),
    /// A terminal resize request.
    Resize { rows: u16, cols: u16 },
    /// Keepalive probe.
    Ping,
    /// Keepalive reply.
    Pong,
    /// Graceful channel close notification.
    Close,
}

/// Errors from decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer than 3 bytes were supplied.
    MessageTooShort,
    /// The header's length field claims more payload than is present.
    InvalidLength,
    /// The payload exceeds [`MAX_PAYLOAD_SIZE`].
    PayloadTooLarge,
    /// The type byte does not match any known message type.
    UnknownType(u8),
    /// The resize payload was not exactly 4 bytes.
    InvalidResizePayload,
    /// Deflate decompression failed or exceeded the inflation ceiling.
    DecompressionFailed,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageTooShort => write!(f, "frame shorter than the 3-byte header"),
            Self::InvalidLength => write!(f, "header length exceeds remaining bytes"),
            Self::PayloadTooLarge => write!(f, "payload exceeds {MAX_PAYLOAD_SIZE} bytes"),
            Self::UnknownType(t) => write!(f, "unknown frame type 0x{t:02x}"),
            Self::InvalidResizePayload => write!(f, "resize payload must be exactly 4 bytes"),
            Self::DecompressionFailed => write!(f, "failed to inflate compressed payload"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Encodes a message into its wire representation, compressing `Data`
/// payloads when doing so is both eligible and strictly smaller.
pub fn encode(msg: &Message) -> Result<Vec<u8>, FrameError> {
    match msg {
        Message::Data(payload) => encode_data(payload),
        Message::Resize { rows, cols } => {
            let mut payload = Vec::with_capacity(4);
            payload.extend_from_slice(&rows.to_be_bytes());
            payload.extend_from_slice(&cols.to_be_bytes());
            encode_header(TYPE_RESIZE, &payload)
        }
        Message::Ping => encode_header(TYPE_PING, &[]),
        Message::Pong => encode_header(TYPE_PONG, &[]),
        Message::Close => encode_header(TYPE_CLOSE, &[]),
    }
}

fn encode_data(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() >= COMPRESSION_THRESHOLD {
        if let Some(compressed) = deflate(payload) {
            if compressed.len() < payload.len() {
                return encode_header(TYPE_DATA_COMPRESSED, &compressed);
            }
        }
    }
    encode_header(TYPE_DATA, payload)
}

fn encode_header(ty: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge);
    }
    let len = payload.len() as u16;
    let mut out = Vec::with_capacity(3 + payload.len());
    out.push(ty);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes one message from a complete byte slice (each encrypted
/// message is already a complete framing unit — no incremental buffering
/// is needed, unlike a byte-stream transport).
pub fn decode(bytes: &[u8]) -> Result<Message, FrameError> {
    if bytes.len() < 3 {
        return Err(FrameError::MessageTooShort);
    }
    let ty = bytes[0];
    let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
    let payload = &bytes[3..];
    if len > payload.len() {
        return Err(FrameError::InvalidLength);
    }
    let payload = &payload[..len];

    match ty {
        TYPE_DATA => Ok(Message::Data(payload.to_vec())),
        TYPE_DATA_COMPRESSED => Ok(Message::Data(inflate(payload)?)),
        TYPE_RESIZE => {
            if payload.len() != 4 {
                return Err(FrameError::InvalidResizePayload);
            }
            let rows = u16::from_be_bytes([payload[0], payload[1]]);
            let cols = u16::from_be_bytes([payload[2], payload[3]]);
            Ok(Message::Resize { rows, cols })
        }
        TYPE_PING => Ok(Message::Ping),
        TYPE_PONG => Ok(Message::Pong),
        TYPE_CLOSE => Ok(Message::Close),
        other => Err(FrameError::UnknownType(other)),
    }
}

fn deflate(data: &[u8]) -> Option<Vec<u8>> {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).ok()?;
    encoder.finish().ok()
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    use flate2::read::DeflateDecoder;

    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .by_ref()
        .take(MAX_INFLATE_SIZE as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|_| FrameError::DecompressionFailed)?;
    if out.len() > MAX_INFLATE_SIZE {
        return Err(FrameError::DecompressionFailed);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_data() {
        let msg = Message::Data(b"ls -la\n".to_vec());
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_roundtrip_resize() {
        let msg = Message::Resize { rows: 24, cols: 80 };
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_roundtrip_control_messages() {
        for msg in [Message::Ping, Message::Pong, Message::Close] {
            let bytes = encode(&msg).unwrap();
            assert_eq!(decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_large_compressible_payload_roundtrips() {
        let payload = vec![b'a'; 4096];
        let msg = Message::Data(payload.clone());
        let bytes = encode(&msg).unwrap();
        // Compression should have kicked in: wire form much smaller than payload.
        assert!(bytes.len() < payload.len());
        assert_eq!(decode(&bytes).unwrap(), Message::Data(payload));
    }

    #[test]
    fn test_incompressible_small_payload_not_compressed() {
        let payload = b"short".to_vec();
        let msg = Message::Data(payload.clone());
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes[0], TYPE_DATA);
        assert_eq!(decode(&bytes).unwrap(), Message::Data(payload));
    }

    #[test]
    fn test_oversized_payload_rejected_at_producer() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let err = encode(&Message::Data(payload)).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLarge);
    }

    #[test]
    fn test_message_too_short() {
        assert_eq!(decode(&[0x01, 0x00]).unwrap_err(), FrameError::MessageTooShort);
    }

    #[test]
    fn test_invalid_length_header() {
        let bytes = [TYPE_DATA, 0x00, 0x05, b'a', b'b'];
        assert_eq!(decode(&bytes).unwrap_err(), FrameError::InvalidLength);
    }

    #[test]
    fn test_unknown_type() {
        let bytes = [0xFF, 0x00, 0x00];
        assert_eq!(decode(&bytes).unwrap_err(), FrameError::UnknownType(0xFF));
    }
}
