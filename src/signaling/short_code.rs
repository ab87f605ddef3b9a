//! Short-code HTTP rendezvous client (the primary signaling path).
//!
//! Grounded on `channel/webrtc.rs::fetch_ice_config`'s `reqwest::Client`
//! usage and `relay/connection.rs`'s long-poll/backoff shape, retargeted at
//! this crate's relay contract (spec §4.7).

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{HostNegotiation, SignalingError};

/// Per-request timeout for the long-poll `GET /session/{code}/answer` call.
const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(30);
/// Gap between successive long-poll attempts.
const POLL_GAP: Duration = Duration::from_millis(100);

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    sdp: &'a str,
    salt: String,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    code: String,
    expires_in: u64,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct AnswerResponse {
    #[serde(default)]
    sdp: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Posts a fresh offer to the relay, returning the short code it was
/// assigned.
pub async fn create_session(
    client: &reqwest::Client,
    relay_url: &str,
    client_url_base: &str,
    sdp: &str,
    salt: &[u8; 16],
) -> Result<HostNegotiation, SignalingError> {
    let body = CreateSessionRequest {
        sdp,
        salt: BASE64.encode(salt),
    };
    let resp = client
        .post(format!("{relay_url}/session"))
        .json(&body)
        .send()
        .await
        .map_err(|e| SignalingError::Http(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(SignalingError::RelayRejected(resp.status().to_string()));
    }

    let parsed: CreateSessionResponse = resp
        .json()
        .await
        .map_err(|e| SignalingError::InvalidResponse(e.to_string()))?;

    let client_url = parsed
        .url
        .unwrap_or_else(|| format!("{client_url_base}/?c={}", parsed.code));

    Ok(HostNegotiation {
        short_code: parsed.code,
        expires_in: parsed.expires_in,
        client_url,
    })
}

/// Long-polls `GET /session/{code}/answer` until an answer is posted or
/// `overall_timeout` elapses.
pub async fn poll_for_answer(
    client: &reqwest::Client,
    relay_url: &str,
    code: &str,
    overall_timeout: Duration,
) -> Result<String, SignalingError> {
    let deadline = tokio::time::Instant::now() + overall_timeout;
    let mut transient_errors = 0u32;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(SignalingError::Timeout);
        }

        let resp = match client
            .get(format!("{relay_url}/session/{code}/answer"))
            .timeout(LONG_POLL_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(_) => {
                // Transient network failure: back off and retry rather than
                // giving up on the whole wait.
                transient_errors += 1;
                tokio::time::sleep(crate::backoff::next_delay(transient_errors - 1)).await;
                continue;
            }
        };

        if !resp.status().is_success() {
            return Err(SignalingError::RelayRejected(resp.status().to_string()));
        }
        transient_errors = 0;

        let parsed: AnswerResponse = resp
            .json()
            .await
            .map_err(|e| SignalingError::InvalidResponse(e.to_string()))?;

        if let Some(sdp) = parsed.sdp {
            return Ok(sdp);
        }
        if parsed.status.as_deref() == Some("waiting") {
            tokio::time::sleep(POLL_GAP).await;
            continue;
        }
        return Err(SignalingError::InvalidResponse(
            "answer response had neither sdp nor waiting status".to_string(),
        ));
    }
}

/// Fetches `{sdp, salt}` for `code` (the controller side of short-code
/// negotiation).
pub async fn fetch_offer(
    client: &reqwest::Client,
    relay_url: &str,
    code: &str,
) -> Result<(String, [u8; 16]), SignalingError> {
    #[derive(Deserialize)]
    struct OfferResponse {
        sdp: String,
        salt: String,
    }

    let resp = client
        .get(format!("{relay_url}/session/{code}"))
        .send()
        .await
        .map_err(|e| SignalingError::Http(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(SignalingError::RelayRejected(resp.status().to_string()));
    }

    let parsed: OfferResponse = resp
        .json()
        .await
        .map_err(|e| SignalingError::InvalidResponse(e.to_string()))?;

    let salt_bytes = BASE64
        .decode(parsed.salt)
        .map_err(|e| SignalingError::InvalidResponse(e.to_string()))?;
    if salt_bytes.len() != 16 {
        return Err(SignalingError::InvalidResponse(
            "salt was not 16 bytes".to_string(),
        ));
    }
    let mut salt = [0u8; 16];
    salt.copy_from_slice(&salt_bytes);
    Ok((parsed.sdp, salt))
}

/// Posts the controller's answer back to the relay.
pub async fn post_answer(
    client: &reqwest::Client,
    relay_url: &str,
    code: &str,
    sdp: &str,
) -> Result<(), SignalingError> {
    #[derive(Serialize)]
    struct AnswerRequest<'a> {
        sdp: &'a str,
    }

    let resp = client
        .post(format!("{relay_url}/session/{code}/answer"))
        .json(&AnswerRequest { sdp })
        .send()
        .await
        .map_err(|e| SignalingError::Http(e.to_string()))?;

    if resp.status().is_success() {
        Ok(())
    } else {
        Err(SignalingError::RelayRejected(resp.status().to_string()))
    }
}

/// Sends a pure heartbeat (`PATCH /session/{code}`) to keep a session warm
/// against the relay's inactivity eviction.
pub async fn heartbeat(
    client: &reqwest::Client,
    relay_url: &str,
    code: &str,
) -> Result<(), SignalingError> {
    let resp = client
        .patch(format!("{relay_url}/session/{code}"))
        .send()
        .await
        .map_err(|e| SignalingError::Http(e.to_string()))?;
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(SignalingError::RelayRejected(resp.status().to_string()))
    }
}
