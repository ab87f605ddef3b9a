//! Compact encodings of session descriptors for out-of-band exchange.
//!
//! Two independent encodings exist because they serve two different
//! signaling paths (see `signaling`):
//!
//! - [`encode_session`]/[`decode_session`] carries a locally-exposed port
//!   alongside the salt, for the direct-HTTP-with-UPnP path.
//! - [`encode_offer`]/[`decode_offer`] and [`encode_answer`]/[`decode_answer`]
//!   are the fully offline/manual compact descriptors (QR-renderable),
//!   which carry a version byte instead of a port and, for the answer
//!   direction, no salt at all.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Version tag for the offline compact descriptor.
const OFFER_VERSION: u8 = 0x01;
/// Minimum byte length of a `port || salt` prefix, before any zstd body.
const SESSION_PREFIX_LEN: usize = 2 + 16;

/// Errors from decoding a compact SDP descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpCodecError {
    /// The payload was shorter than the fixed-size prefix it must carry.
    Truncated,
    /// The zstd body failed to decompress.
    DecompressionFailed,
    /// The base64 envelope itself was malformed.
    InvalidEncoding,
    /// The version byte did not match the one this codec understands.
    UnsupportedVersion(u8),
}

impl fmt::Display for SdpCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "payload shorter than required prefix"),
            Self::DecompressionFailed => write!(f, "zstd decompression failed"),
            Self::InvalidEncoding => write!(f, "invalid base64 encoding"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported descriptor version {v}"),
        }
    }
}

impl std::error::Error for SdpCodecError {}

fn zstd_compress(data: &str) -> Result<Vec<u8>, SdpCodecError> {
    zstd::encode_all(data.as_bytes(), 0).map_err(|_| SdpCodecError::DecompressionFailed)
}

fn zstd_decompress(data: &[u8]) -> Result<String, SdpCodecError> {
    let bytes = zstd::decode_all(data).map_err(|_| SdpCodecError::DecompressionFailed)?;
    String::from_utf8(bytes).map_err(|_| SdpCodecError::DecompressionFailed)
}

/// Encodes `port_be16 || salt(16) || zstd(sdp)`, base64-encoded.
pub fn encode_session(sdp: &str, salt: &[u8; 16], port: u16) -> Result<String, SdpCodecError> {
    let compressed = zstd_compress(sdp)?;
    let mut out = Vec::with_capacity(SESSION_PREFIX_LEN + compressed.len());
    out.extend_from_slice(&port.to_be_bytes());
    out.extend_from_slice(salt);
    out.extend_from_slice(&compressed);
    Ok(URL_SAFE_NO_PAD.encode(out))
}

/// Reverses [`encode_session`], returning `(sdp, salt, port)`.
pub fn decode_session(encoded: &str) -> Result<(String, [u8; 16], u16), SdpCodecError> {
    let raw = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| SdpCodecError::InvalidEncoding)?;
    if raw.len() < SESSION_PREFIX_LEN {
        return Err(SdpCodecError::Truncated);
    }
    let port = u16::from_be_bytes([raw[0], raw[1]]);
    let mut salt = [0u8; 16];
    salt.copy_from_slice(&raw[2..18]);
    let sdp = zstd_decompress(&raw[18..])?;
    Ok((sdp, salt, port))
}

/// Encodes the offline/manual host-side descriptor:
/// `base64url(0x01 || salt(16) || zstd(sdp))`.
pub fn encode_offer(sdp: &str, salt: &[u8; 16]) -> Result<String, SdpCodecError> {
    let compressed = zstd_compress(sdp)?;
    let mut out = Vec::with_capacity(1 + 16 + compressed.len());
    out.push(OFFER_VERSION);
    out.extend_from_slice(salt);
    out.extend_from_slice(&compressed);
    Ok(URL_SAFE_NO_PAD.encode(out))
}

/// Reverses [`encode_offer`], returning `(sdp, salt)`.
pub fn decode_offer(encoded: &str) -> Result<(String, [u8; 16]), SdpCodecError> {
    let raw = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| SdpCodecError::InvalidEncoding)?;
    if raw.len() < 1 + 16 {
        return Err(SdpCodecError::Truncated);
    }
    if raw[0] != OFFER_VERSION {
        return Err(SdpCodecError::UnsupportedVersion(raw[0]));
    }
    let mut salt = [0u8; 16];
    salt.copy_from_slice(&raw[1..17]);
    let sdp = zstd_decompress(&raw[17..])?;
    Ok((sdp, salt))
}

/// Encodes the offline/manual answer descriptor: `base64url(0x01 || zstd(sdp))`.
/// Carries no salt — the answer side already derived its key from the offer.
pub fn encode_answer(sdp: &str) -> Result<String, SdpCodecError> {
    let compressed = zstd_compress(sdp)?;
    let mut out = Vec::with_capacity(1 + compressed.len());
    out.push(OFFER_VERSION);
    out.extend_from_slice(&compressed);
    Ok(URL_SAFE_NO_PAD.encode(out))
}

/// Reverses [`encode_answer`].
pub fn decode_answer(encoded: &str) -> Result<String, SdpCodecError> {
    let raw = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| SdpCodecError::InvalidEncoding)?;
    if raw.is_empty() {
        return Err(SdpCodecError::Truncated);
    }
    if raw[0] != OFFER_VERSION {
        return Err(SdpCodecError::UnsupportedVersion(raw[0]));
    }
    zstd_decompress(&raw[1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SDP: &str = "v=0\r\no=- 46 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    #[test]
    fn test_encode_session_roundtrip() {
        let salt = [9u8; 16];
        let encoded = encode_session(SAMPLE_SDP, &salt, 8080).unwrap();
        let (sdp, decoded_salt, port) = decode_session(&encoded).unwrap();
        assert_eq!(sdp, SAMPLE_SDP);
        assert_eq!(decoded_salt, salt);
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_encode_session_port_bounds() {
        let salt = [0u8; 16];
        for port in [0u16, 1, 65535] {
            let encoded = encode_session(SAMPLE_SDP, &salt, port).unwrap();
            let (_, _, decoded_port) = decode_session(&encoded).unwrap();
            assert_eq!(decoded_port, port);
        }
    }

    #[test]
    fn test_decode_session_truncated() {
        let short = URL_SAFE_NO_PAD.encode([0u8; 10]);
        assert_eq!(decode_session(&short).unwrap_err(), SdpCodecError::Truncated);
    }

    #[test]
    fn test_offer_roundtrip() {
        let salt = [3u8; 16];
        let encoded = encode_offer(SAMPLE_SDP, &salt).unwrap();
        let (sdp, decoded_salt) = decode_offer(&encoded).unwrap();
        assert_eq!(sdp, SAMPLE_SDP);
        assert_eq!(decoded_salt, salt);
    }

    #[test]
    fn test_answer_roundtrip_has_no_salt() {
        let encoded = encode_answer(SAMPLE_SDP).unwrap();
        let sdp = decode_answer(&encoded).unwrap();
        assert_eq!(sdp, SAMPLE_SDP);
    }

    #[test]
    fn test_offer_rejects_bad_version() {
        let mut raw = vec![0xFFu8];
        raw.extend_from_slice(&[0u8; 16]);
        raw.extend_from_slice(&zstd_compress(SAMPLE_SDP).unwrap());
        let encoded = URL_SAFE_NO_PAD.encode(raw);
        assert!(matches!(
            decode_offer(&encoded).unwrap_err(),
            SdpCodecError::UnsupportedVersion(0xFF)
        ));
    }
}
