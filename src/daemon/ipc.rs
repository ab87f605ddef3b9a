//! The daemon's JSON-RPC protocol: newline-delimited JSON, one request and
//! one response per connection, methods `session.start`/`session.stop`/
//! `session.list`/`daemon.status`/`daemon.shutdown`.
//!
//! Grounded on `socket/server.rs`'s accept-loop shape and `socket/
//! framing.rs`'s line-oriented framing, replacing the heritage's
//! multi-message-per-connection protocol with this crate's simpler
//! one-shot-per-connection contract (spec §4.10).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use crate::channel::IceServerConfig;
use crate::session::{SessionManager, SessionStatus, StartSessionParams};

/// Read deadline for one request on an accepted connection.
const READ_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub enum ErrorCode {
    DaemonNotRunning = 1001,
    SessionNotFound = 1002,
    SessionCreateFailed = 1003,
    InvalidParams = 1004,
    InternalError = 1005,
}

#[derive(Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize, Deserialize)]
struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize, Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl Response {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Option<Value>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code: code as i32,
                message: message.into(),
            }),
        }
    }
}

#[derive(Deserialize, Default)]
struct StartSessionRequest {
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    shell: Option<String>,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    record: bool,
    #[serde(default = "default_rows")]
    rows: u16,
    #[serde(default = "default_cols")]
    cols: u16,
}

fn default_rows() -> u16 {
    crate::pty::DEFAULT_ROWS
}

fn default_cols() -> u16 {
    crate::pty::DEFAULT_COLS
}

#[derive(Deserialize)]
struct StopSessionRequest {
    id: String,
}

/// Daemon-wide signaling defaults, set once at startup from the
/// environment; per-call requests only ever vary the shell/password/
/// public/record/size fields above.
#[derive(Clone)]
pub struct DaemonConfig {
    pub relay_url: Option<String>,
    pub client_url_base: String,
    pub turn_servers: Vec<IceServerConfig>,
    pub relay_ws: bool,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let turn_servers = match std::env::var("TT_TURN_URL") {
            Ok(url) => vec![IceServerConfig {
                url,
                username: std::env::var("TT_TURN_USERNAME").ok(),
                credential: std::env::var("TT_TURN_PASSWORD").ok(),
            }],
            Err(_) => Vec::new(),
        };
        Self {
            relay_url: std::env::var("TT_RELAY_URL").ok(),
            client_url_base: std::env::var("TT_CLIENT_URL")
                .unwrap_or_else(|_| "https://app.terminal-tunnel.dev".to_string()),
            turn_servers,
            relay_ws: std::env::var("TT_RELAY_SIGNALING").is_ok_and(|v| v == "ws"),
        }
    }
}

/// Issues one request over an already-connected socket and returns its
/// `result`, or a plain error built from the RPC error body. Consumes the
/// connection: the protocol is one request/response per connection.
pub async fn call(mut stream: UnixStream, method: &str, params: Value) -> anyhow::Result<Value> {
    let mut payload = serde_json::to_vec(&serde_json::json!({
        "id": 1,
        "method": method,
        "params": params,
    }))?;
    payload.push(b'\n');
    stream.write_all(&payload).await?;
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: Response = serde_json::from_str(line.trim())?;
    if let Some(error) = response.error {
        anyhow::bail!("{} (code {})", error.message, error.code);
    }
    Ok(response.result.unwrap_or(Value::Null))
}

pub async fn accept_loop(
    listener: UnixListener,
    manager: Arc<SessionManager>,
    cancel: CancellationToken,
    started_at: std::time::Instant,
) {
    let config = Arc::new(DaemonConfig::from_env());
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let manager = Arc::clone(&manager);
                        let config = Arc::clone(&config);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, manager, config, cancel, started_at).await {
                                log::warn!("ipc connection error: {err}");
                            }
                        });
                    }
                    Err(err) => log::warn!("ipc accept error: {err}"),
                }
            }
            () = cancel.cancelled() => break,
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    manager: Arc<SessionManager>,
    config: Arc<DaemonConfig>,
    daemon_cancel: CancellationToken,
    started_at: std::time::Instant,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    let read = tokio::time::timeout(READ_DEADLINE, reader.read_line(&mut line)).await;
    let response = match read {
        Ok(Ok(0)) => return Ok(()),
        Ok(Ok(_)) => dispatch(&line, manager, config, daemon_cancel, started_at).await,
        Ok(Err(err)) => Response::err(None, ErrorCode::InternalError, err.to_string()),
        Err(_) => Response::err(None, ErrorCode::InternalError, "read timed out"),
    };

    let mut encoded = serde_json::to_vec(&response)?;
    encoded.push(b'\n');
    write_half.write_all(&encoded).await?;
    write_half.flush().await?;
    Ok(())
}

async fn dispatch(
    line: &str,
    manager: Arc<SessionManager>,
    config: Arc<DaemonConfig>,
    daemon_cancel: CancellationToken,
    started_at: std::time::Instant,
) -> Response {
    let request: Request = match serde_json::from_str(line.trim()) {
        Ok(req) => req,
        Err(err) => return Response::err(None, ErrorCode::InvalidParams, err.to_string()),
    };
    let id = request.id.clone();

    match request.method.as_str() {
        "session.start" => {
            let params: StartSessionRequest = match serde_json::from_value(request.params) {
                Ok(p) => p,
                Err(err) => return Response::err(id, ErrorCode::InvalidParams, err.to_string()),
            };
            let start_params = StartSessionParams {
                password: params.password,
                shell: params.shell,
                public: params.public,
                record: params.record,
                relay_url: config.relay_url.clone(),
                client_url_base: config.client_url_base.clone(),
                turn_servers: config.turn_servers.clone(),
                rows: params.rows,
                cols: params.cols,
                relay_ws: config.relay_ws,
            };
            match manager.start_session(start_params).await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(value) => Response::ok(id, value),
                    Err(err) => Response::err(id, ErrorCode::InternalError, err.to_string()),
                },
                Err(err) => Response::err(id, ErrorCode::SessionCreateFailed, err.to_string()),
            }
        }
        "session.stop" => {
            let params: StopSessionRequest = match serde_json::from_value(request.params) {
                Ok(p) => p,
                Err(err) => return Response::err(id, ErrorCode::InvalidParams, err.to_string()),
            };
            match manager.stop_session(&params.id) {
                Ok(()) => Response::ok(id, serde_json::json!({"stopped": true})),
                Err(err) => Response::err(id, ErrorCode::SessionNotFound, err.to_string()),
            }
        }
        "session.list" => Response::ok(
            id,
            serde_json::json!({ "sessions": manager.list_sessions() }),
        ),
        "daemon.status" => {
            let sessions = manager.list_sessions();
            let active_count = sessions
                .iter()
                .filter(|s| s.status == SessionStatus::Connected)
                .count();
            Response::ok(
                id,
                serde_json::json!({
                    "running": true,
                    "pid": std::process::id(),
                    "uptime": started_at.elapsed().as_secs(),
                    "session_count": sessions.len(),
                    "active_count": active_count,
                }),
            )
        }
        "daemon.shutdown" => {
            let sessions_stopped = manager.list_sessions().len();
            daemon_cancel.cancel();
            Response::ok(
                id,
                serde_json::json!({
                    "success": true,
                    "sessions_stopped": sessions_stopped,
                }),
            )
        }
        other => Response::err(id, ErrorCode::InvalidParams, format!("unknown method {other}")),
    }
}
