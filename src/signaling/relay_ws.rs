//! WebSocket relay signaling (the alternative to short-code HTTP polling).
//!
//! Grounded on `ws.rs`'s `tokio-tungstenite` client loop, retargeted at the
//! relay's `{type, session_id, role, sdp, salt, error}` message protocol
//! (spec §4.6).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::SignalingError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A connected relay WebSocket session, scoped to one `session_id`/`role`.
pub struct RelaySocket {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

impl RelaySocket {
    /// Connects with [`crate::backoff::next_delay`] between attempts,
    /// retrying until `max_attempts` is exhausted or cancellation fires.
    pub async fn connect_with_retry(
        relay_url: &str,
        code: &str,
        role: Role,
        max_attempts: u32,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<Self, SignalingError> {
        let mut attempt = 0;
        loop {
            tokio::select! {
                result = Self::connect(relay_url, code, role) => {
                    match result {
                        Ok(socket) => return Ok(socket),
                        Err(err) if attempt + 1 >= max_attempts => return Err(err),
                        Err(_) => {
                            let delay = crate::backoff::next_delay(attempt);
                            attempt += 1;
                            tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                () = cancel.cancelled() => return Err(SignalingError::Cancelled),
                            }
                        }
                    }
                }
                () = cancel.cancelled() => return Err(SignalingError::Cancelled),
            }
        }
    }

    /// Connects to `{relay_url}/ws?session={code}` and registers with the
    /// given role.
    pub async fn connect(
        relay_url: &str,
        code: &str,
        role: Role,
    ) -> Result<Self, SignalingError> {
        let ws_url = format!(
            "{}/ws?session={code}",
            relay_url.replacen("http", "ws", 1)
        );
        let (stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| SignalingError::Http(e.to_string()))?;
        let mut socket = Self { stream };
        socket
            .send(&RelayMessage {
                kind: "register".to_string(),
                session_id: Some(code.to_string()),
                role: Some(role),
                sdp: None,
                salt: None,
                error: None,
            })
            .await?;
        Ok(socket)
    }

    /// Sends the host's offer (and salt) after registering.
    pub async fn send_offer(
        &mut self,
        code: &str,
        sdp: &str,
        salt: &[u8; 16],
    ) -> Result<(), SignalingError> {
        self.send(&RelayMessage {
            kind: "offer".to_string(),
            session_id: Some(code.to_string()),
            role: Some(Role::Host),
            sdp: Some(sdp.to_string()),
            salt: Some(BASE64.encode(salt)),
            error: None,
        })
        .await
    }

    /// Sends the controller's answer.
    pub async fn send_answer(&mut self, code: &str, sdp: &str) -> Result<(), SignalingError> {
        self.send(&RelayMessage {
            kind: "answer".to_string(),
            session_id: Some(code.to_string()),
            role: Some(Role::Client),
            sdp: Some(sdp.to_string()),
            salt: None,
            error: None,
        })
        .await
    }

    async fn send(&mut self, msg: &RelayMessage) -> Result<(), SignalingError> {
        let text = serde_json::to_string(msg)
            .map_err(|e| SignalingError::InvalidResponse(e.to_string()))?;
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| SignalingError::Http(e.to_string()))
    }

    /// Awaits the next relay message addressed to this socket.
    pub async fn recv(&mut self) -> Result<RelayMessage, SignalingError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| SignalingError::InvalidResponse(e.to_string()));
                }
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SignalingError::Http(e.to_string())),
                None => return Err(SignalingError::Cancelled),
            }
        }
    }
}
