//! End-to-end session flow tests against a mock upstream engine.
//!
//! Each test boots the full bridge router on an ephemeral port, connects a
//! WebSocket client playing the part of the device, and scripts the engine
//! side through the mock.

mod mock_engine;

use std::net::SocketAddr;
use std::time::Duration;

use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use mock_engine::MockEngine;
use verso_bridge::config::BridgeConfig;
use verso_bridge::{AppState, routes};

/// Boot the bridge against the given engine URL; returns its address.
async fn spawn_bridge(engine_url: &str) -> SocketAddr {
    let config = BridgeConfig {
        host: "127.0.0.1".to_string(),
        engine_url: engine_url.to_string(),
        ..Default::default()
    };
    let state = AppState::new(config);
    let app = routes::app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind bridge");
    let addr = listener.local_addr().expect("bridge addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve bridge");
    });
    addr
}

/// Something the device-side client observed.
#[derive(Debug)]
enum Seen {
    Json(serde_json::Value),
    Audio(usize),
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/v1/session"))
            .await
            .expect("connect client");
        Self { ws }
    }

    async fn send_json(&mut self, value: serde_json::Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("client send");
    }

    async fn send_audio(&mut self, pcm: &[u8]) {
        self.ws
            .send(Message::Binary(pcm.to_vec().into()))
            .await
            .expect("client send audio");
    }

    /// Next observed message within the timeout, skipping ping/pong.
    async fn recv(&mut self, timeout: Duration) -> Option<Seen> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return serde_json::from_str(&text).ok().map(Seen::Json);
                }
                Ok(Some(Ok(Message::Binary(data)))) => return Some(Seen::Audio(data.len())),
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) | Ok(None) => return None,
                Err(_) => return None,
            }
        }
    }

    /// Wait for a JSON message of the given type, discarding everything else.
    async fn wait_for_type(&mut self, event_type: &str, timeout: Duration) -> Option<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match self.recv(remaining).await {
                Some(Seen::Json(value)) if value["type"] == event_type => return Some(value),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    /// Count binary audio frames observed within the window.
    async fn count_audio_for(&mut self, window: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + window;
        let mut count = 0;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return count;
            }
            match self.recv(remaining).await {
                Some(Seen::Audio(_)) => count += 1,
                Some(_) => continue,
                None => return count,
            }
        }
    }
}

fn audio_delta(response_id: &str, pcm: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "type": "response.audio.delta",
        "response_id": response_id,
        "delta": BASE64_STANDARD.encode(pcm),
    })
}

fn response_created(response_id: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "response.created",
        "response": {"id": response_id}
    })
}

fn response_done(response_id: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "response.done",
        "response": {"id": response_id, "status": "completed"}
    })
}

/// Scenario: client audio flows until a response opens; everything the
/// client sends during the response and the grace window after it is
/// dropped, never queued.
#[tokio::test]
async fn test_echo_suppression_during_and_after_response() {
    let engine = MockEngine::spawn().await;
    let addr = spawn_bridge(&engine.url()).await;
    let mut client = TestClient::connect(addr).await;

    assert!(
        client
            .wait_for_type("session_ready", Duration::from_secs(5))
            .await
            .is_some()
    );

    // 10 chunks while idle: all forwarded
    for _ in 0..10 {
        client.send_audio(&[0u8; 64]).await;
    }
    assert!(
        engine
            .wait_for_count("input_audio_buffer.append", 10, Duration::from_secs(5))
            .await
    );

    // Engine opens a response and streams 3 deltas
    engine.send(response_created("r1")).await;
    assert!(
        client
            .wait_for_type("mute_mic", Duration::from_secs(2))
            .await
            .is_some()
    );

    for _ in 0..3 {
        engine.send(audio_delta("r1", &[1u8; 128])).await;
    }
    assert_eq!(client.count_audio_for(Duration::from_millis(500)).await, 3);

    // Chunks sent mid-response are suppressed
    for _ in 0..3 {
        client.send_audio(&[2u8; 64]).await;
    }

    engine.send(response_done("r1")).await;
    assert!(
        client
            .wait_for_type("unmute_mic", Duration::from_secs(2))
            .await
            .is_some()
    );

    // Still inside the 2000ms grace window after done: suppressed as well
    for _ in 0..5 {
        client.send_audio(&[3u8; 64]).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.count_of("input_audio_buffer.append").await, 10);
}

/// Scenario: a visual question with no usable frame triggers a frame
/// request; the fresh frame is injected and a response created.
#[tokio::test]
async fn test_visual_question_requests_and_injects_frame() {
    let engine = MockEngine::spawn().await;
    let addr = spawn_bridge(&engine.url()).await;
    let mut client = TestClient::connect(addr).await;
    client
        .wait_for_type("session_ready", Duration::from_secs(5))
        .await
        .expect("session ready");

    client
        .send_json(serde_json::json!({"type": "user_message", "text": "what do you see"}))
        .await;

    assert!(
        client
            .wait_for_type("request_frame", Duration::from_secs(2))
            .await
            .is_some()
    );

    // Reply within the 500ms wait
    client
        .send_json(serde_json::json!({
            "type": "frame",
            "frame": BASE64_STANDARD.encode(b"jpeg-bytes"),
        }))
        .await;

    assert!(
        engine
            .wait_for_count("response.create", 1, Duration::from_secs(2))
            .await
    );

    // The injected image item must precede the response
    let received = engine.received().await;
    let has_image_item = received.iter().any(|event| {
        event["type"] == "conversation.item.create"
            && event["item"]["content"][0]["type"] == "input_image"
    });
    assert!(has_image_item, "expected an input_image item: {received:?}");
}

/// Scenario: the frame request times out; the bridge proceeds without
/// blocking instead of hanging the turn.
#[tokio::test]
async fn test_frame_wait_timeout_falls_back() {
    let engine = MockEngine::spawn().await;
    let addr = spawn_bridge(&engine.url()).await;
    let mut client = TestClient::connect(addr).await;
    client
        .wait_for_type("session_ready", Duration::from_secs(5))
        .await
        .expect("session ready");

    client
        .send_json(serde_json::json!({"type": "user_message", "text": "describe this"}))
        .await;
    assert!(
        client
            .wait_for_type("request_frame", Duration::from_secs(2))
            .await
            .is_some()
    );

    // No frame ever arrives; the response is still created after ~500ms
    assert!(
        engine
            .wait_for_count("response.create", 1, Duration::from_secs(3))
            .await
    );
    let received = engine.received().await;
    let has_image_item = received.iter().any(|event| {
        event["type"] == "conversation.item.create"
            && event["item"]["content"][0]["type"] == "input_image"
    });
    assert!(!has_image_item, "no frame existed, nothing to inject");
}

/// Scenario: user speech during a streaming response cancels it atomically;
/// no further audio for the cancelled response reaches the client, and a
/// subsequent response flows normally.
#[tokio::test]
async fn test_barge_in_cancels_and_blocks_stale_audio() {
    let engine = MockEngine::spawn().await;
    let addr = spawn_bridge(&engine.url()).await;
    let mut client = TestClient::connect(addr).await;
    client
        .wait_for_type("session_ready", Duration::from_secs(5))
        .await
        .expect("session ready");

    engine.send(response_created("r1")).await;
    engine.send(audio_delta("r1", &[1u8; 128])).await;
    assert_eq!(client.count_audio_for(Duration::from_millis(500)).await, 1);

    // User starts talking over the response
    engine
        .send(serde_json::json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 1200,
        }))
        .await;

    assert!(
        client
            .wait_for_type("stop_audio", Duration::from_secs(2))
            .await
            .is_some()
    );
    assert!(
        engine
            .wait_for_count("response.cancel", 1, Duration::from_secs(2))
            .await
    );

    // A straggler delta for the cancelled response must not reach the client
    engine.send(audio_delta("r1", &[1u8; 128])).await;
    assert_eq!(client.count_audio_for(Duration::from_millis(300)).await, 0);

    engine.send(response_done("r1")).await;

    // The next response streams normally
    engine.send(response_created("r2")).await;
    engine.send(audio_delta("r2", &[2u8; 128])).await;
    assert_eq!(client.count_audio_for(Duration::from_millis(500)).await, 1);
}

/// Scenario: a banned-phrase response is withheld from the transcript
/// surface, silently.
#[tokio::test]
async fn test_quality_gate_suppresses_banned_phrase_transcript() {
    let engine = MockEngine::spawn().await;
    let addr = spawn_bridge(&engine.url()).await;
    let mut client = TestClient::connect(addr).await;
    client
        .wait_for_type("session_ready", Duration::from_secs(5))
        .await
        .expect("session ready");

    engine.send(response_created("r1")).await;
    engine
        .send(serde_json::json!({
            "type": "response.audio_transcript.done",
            "transcript": "Exactly! Happy to help with that.",
        }))
        .await;
    engine.send(response_done("r1")).await;

    assert!(
        client
            .wait_for_type("transcript", Duration::from_millis(500))
            .await
            .is_none(),
        "banned phrase must not surface"
    );

    // A clean response after the rate-guard window does surface
    tokio::time::sleep(Duration::from_millis(1100)).await;
    engine.send(response_created("r2")).await;
    engine
        .send(serde_json::json!({
            "type": "response.audio_transcript.done",
            "transcript": "The bridge is working normally.",
        }))
        .await;
    engine.send(response_done("r2")).await;

    let transcript = client
        .wait_for_type("transcript", Duration::from_secs(2))
        .await
        .expect("clean transcript should surface");
    assert_eq!(transcript["role"], "assistant");
}

/// Scenario: the engine being unreachable surfaces a terminal error to the
/// client instead of a hang.
#[tokio::test]
async fn test_engine_unavailable_reports_error() {
    // Nothing listens on this port
    let addr = spawn_bridge("ws://127.0.0.1:9").await;
    let mut client = TestClient::connect(addr).await;

    let error = client
        .wait_for_type("error", Duration::from_secs(5))
        .await
        .expect("error message");
    assert_eq!(error["code"], "engine_unavailable");
}

/// The health endpoint reports the active session count.
#[tokio::test]
async fn test_health_endpoint() {
    let engine = MockEngine::spawn().await;
    let addr = spawn_bridge(&engine.url()).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/"))
        .await
        .expect("health request")
        .json()
        .await
        .expect("health body");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_sessions"], 0);
}
