//! The short-code rendezvous relay: stores offers, forwards answers,
//! rate-limits by IP, and expires sessions by inactivity.
//!
//! Grounded on `other_examples`'s `oprf-service` (`api/v1.rs`) for the
//! idiomatic `axum::extract::WebSocketUpgrade` + `Router` shape, and on
//! `hub/daemon.rs`/`socket/server.rs`'s accept-loop/lifecycle conventions
//! for the standalone binary that hosts it. This component has no direct
//! teacher counterpart — the teacher only ever talks to an external relay.

mod rate_limit;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use rate_limit::RateLimiter;
pub use state::{RelayState, SharedState};

/// Default per-IP request budget (requests per minute).
const RATE_LIMIT_PER_MINUTE: u32 = 30;
/// Sessions idle longer than this are evicted by the sweeper.
const INACTIVITY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5 * 60);
/// How often the sweeper runs. Short enough to enforce the ~5s post-answer
/// grace period (spec §4.7) promptly, not just the 5-minute inactivity one.
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Clone)]
struct AppState {
    relay: SharedState,
    limiter: Arc<RateLimiter>,
}

#[derive(Deserialize)]
struct CreateSessionBody {
    sdp: String,
    salt: String,
}

#[derive(Serialize)]
struct CreateSessionResponse {
    code: String,
    expires_in: u64,
    url: String,
}

#[derive(Serialize)]
struct OfferResponse {
    sdp: String,
    salt: String,
}

#[derive(Deserialize)]
struct PutSessionBody {
    sdp: String,
    #[serde(default)]
    salt: Option<String>,
}

#[derive(Deserialize)]
struct AnswerBody {
    sdp: String,
}

#[derive(Serialize)]
struct AnswerWaitingResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

async fn create_session(
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<CreateSessionBody>,
) -> Response {
    if !app.limiter.check(addr.ip()).await {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    }
    if body.sdp.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "sdp must not be empty");
    }

    let (code, expires_in) = app.relay.create_session(body.sdp, body.salt).await;
    let url = format!("{}/?c={code}", app.relay.client_url_base());
    Json(CreateSessionResponse {
        code,
        expires_in,
        url,
    })
    .into_response()
}

async fn get_session(
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(code): Path<String>,
) -> Response {
    if !app.limiter.check(addr.ip()).await {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    }
    match app.relay.get_offer(&code).await {
        Some((sdp, salt)) => Json(OfferResponse { sdp, salt }).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "session not found"),
    }
}

async fn put_session(
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(code): Path<String>,
    Json(body): Json<PutSessionBody>,
) -> Response {
    if !app.limiter.check(addr.ip()).await {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    }
    if app.relay.replace_offer(&code, body.sdp, body.salt).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "session not found")
    }
}

async fn patch_session(
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(code): Path<String>,
) -> Response {
    if !app.limiter.check(addr.ip()).await {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    }
    if app.relay.heartbeat(&code).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "session not found")
    }
}

async fn post_answer(
    State(app): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(code): Path<String>,
    Json(body): Json<AnswerBody>,
) -> Response {
    if !app.limiter.check(addr.ip()).await {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    }
    if app.relay.post_answer(&code, body.sdp).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "session not found")
    }
}

async fn get_answer(State(app): State<AppState>, Path(code): Path<String>) -> Response {
    match app.relay.wait_for_answer(&code).await {
        Some(sdp) => Json(OfferResponse {
            sdp,
            salt: String::new(),
        })
        .into_response(),
        None => Json(AnswerWaitingResponse { status: "waiting" }).into_response(),
    }
}

#[derive(Deserialize)]
struct WsQuery {
    session: String,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, app, query.session))
}

async fn handle_ws(mut socket: WebSocket, app: AppState, code: String) {
    let mut rx = match app.relay.subscribe(&code).await {
        Some(rx) => rx,
        None => {
            let _ = socket.close().await;
            return;
        }
    };

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(msg) = serde_json::from_str::<state::WireMessage>(&text) {
                            app.relay.handle_ws_message(&code, msg).await;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
            forwarded = rx.recv() => {
                match forwarded {
                    Ok(msg) => {
                        if let Ok(text) = serde_json::to_string(&msg) {
                            if socket.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

async fn fallback(method: Method) -> Response {
    if matches!(
        method,
        Method::GET | Method::POST | Method::PUT | Method::PATCH
    ) {
        StatusCode::NOT_FOUND.into_response()
    } else {
        StatusCode::METHOD_NOT_ALLOWED.into_response()
    }
}

/// Builds the relay's `axum::Router`, ready to be served, sharing `shared`'s
/// session table with whatever else holds a handle to it (e.g. the
/// sweeper spawned by [`spawn_sweeper`]).
pub fn router(shared: SharedState, allowed_origins: Vec<String>) -> Router {
    let app = AppState {
        relay: shared,
        limiter: Arc::new(RateLimiter::new(RATE_LIMIT_PER_MINUTE)),
    };

    let cors = if allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    Router::new()
        .route("/session", post(create_session))
        .route(
            "/session/:code",
            get(get_session).put(put_session).patch(patch_session),
        )
        .route("/session/:code/answer", get(get_answer).post(post_answer))
        .route("/ws", get(ws_handler))
        .fallback(fallback)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Spawns the background inactivity sweeper; returns its join handle.
pub fn spawn_sweeper(shared: SharedState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            shared.sweep_inactive(INACTIVITY_TIMEOUT).await;
        }
    })
}
