//! Coverage for `signaling::short_code`'s HTTP client functions against a
//! mocked relay, grounded on `relay_server_test.rs`'s real-router coverage
//! of the server side — this file exercises the client in isolation so
//! relay error responses (rate limits, missing sessions, malformed bodies)
//! can be simulated without driving the real sweeper/rate-limiter.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use terminal_tunnel::signaling::short_code;
use terminal_tunnel::signaling::SignalingError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_create_session_parses_code_and_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "ABC23456",
            "expires_in": 300,
        })))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let negotiation = short_code::create_session(
        &client,
        &server.uri(),
        "https://app.terminal-tunnel.dev",
        "v=0 offer",
        &[7u8; 16],
    )
    .await
    .unwrap();

    assert_eq!(negotiation.short_code, "ABC23456");
    assert_eq!(negotiation.expires_in, 300);
    assert_eq!(
        negotiation.client_url,
        "https://app.terminal-tunnel.dev/?c=ABC23456"
    );
}

#[tokio::test]
async fn test_create_session_rejects_non_success_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let err = short_code::create_session(
        &client,
        &server.uri(),
        "https://app.terminal-tunnel.dev",
        "v=0 offer",
        &[0u8; 16],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SignalingError::RelayRejected(_)));
}

#[tokio::test]
async fn test_poll_for_answer_returns_once_sdp_is_present() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/ABC23456/answer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "waiting",
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/session/ABC23456/answer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sdp": "v=0 answer",
        })))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let sdp = short_code::poll_for_answer(
        &client,
        &server.uri(),
        "ABC23456",
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(sdp, "v=0 answer");
}

#[tokio::test]
async fn test_poll_for_answer_times_out_when_never_posted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/ABC23456/answer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "waiting",
        })))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let err = short_code::poll_for_answer(
        &client,
        &server.uri(),
        "ABC23456",
        Duration::from_millis(250),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SignalingError::Timeout));
}

#[tokio::test]
async fn test_fetch_offer_decodes_salt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/ABC23456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sdp": "v=0 offer",
            "salt": BASE64.encode([9u8; 16]),
        })))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let (sdp, salt) = short_code::fetch_offer(&client, &server.uri(), "ABC23456")
        .await
        .unwrap();

    assert_eq!(sdp, "v=0 offer");
    assert_eq!(salt, [9u8; 16]);
}

#[tokio::test]
async fn test_fetch_offer_rejects_malformed_salt_length() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/ABC23456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sdp": "v=0 offer",
            "salt": BASE64.encode([9u8; 4]),
        })))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let err = short_code::fetch_offer(&client, &server.uri(), "ABC23456")
        .await
        .unwrap_err();

    assert!(matches!(err, SignalingError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_post_answer_and_heartbeat_succeed_on_204() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/ABC23456/answer"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/session/ABC23456"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    short_code::post_answer(&client, &server.uri(), "ABC23456", "v=0 answer")
        .await
        .unwrap();
    short_code::heartbeat(&client, &server.uri(), "ABC23456")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_post_answer_reports_missing_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/GONE0000/answer"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let err = short_code::post_answer(&client, &server.uri(), "GONE0000", "v=0 answer")
        .await
        .unwrap_err();

    assert!(matches!(err, SignalingError::RelayRejected(_)));
}
