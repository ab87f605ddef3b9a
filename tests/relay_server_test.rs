//! End-to-end coverage of the relay's HTTP surface against a real bound
//! socket, grounded on `relay_server::state`'s own unit tests but driven
//! through the actual `axum::Router` and a `reqwest` client instead of the
//! in-process `SharedState` API, per spec §8 scenario D (short-code relay
//! round trip).

use terminal_tunnel::relay_server::{router, RelayState, SharedState};

async fn spawn_relay() -> String {
    let shared = SharedState::new(RelayState::new("https://app.terminal-tunnel.dev".to_string()));
    let app = router(shared, Vec::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_create_session_then_fetch_offer_round_trips() {
    let base = spawn_relay().await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = client
        .post(format!("{base}/session"))
        .json(&serde_json::json!({ "sdp": "v=0 offer", "salt": "c2FsdA==" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let code = created["code"].as_str().unwrap().to_string();
    assert!(!code.is_empty());

    let fetched: serde_json::Value = client
        .get(format!("{base}/session/{code}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["sdp"], "v=0 offer");
}

#[tokio::test]
async fn test_posted_answer_is_visible_on_next_poll() {
    let base = spawn_relay().await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = client
        .post(format!("{base}/session"))
        .json(&serde_json::json!({ "sdp": "v=0 offer", "salt": "c2FsdA==" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let code = created["code"].as_str().unwrap().to_string();

    let post_status = client
        .post(format!("{base}/session/{code}/answer"))
        .json(&serde_json::json!({ "sdp": "v=0 answer" }))
        .send()
        .await
        .unwrap()
        .status();
    assert!(post_status.is_success());

    let answer: serde_json::Value = client
        .get(format!("{base}/session/{code}/answer"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(answer["sdp"], "v=0 answer");
}

#[tokio::test]
async fn test_fetching_unknown_session_is_not_found() {
    let base = spawn_relay().await;
    let client = reqwest::Client::new();

    let status = client
        .get(format!("{base}/session/NOSUCHCODE"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
}
