//! End-to-end relay tests: real WebSocket peers against a running relay.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use towerloop_relay::{RelayConfig, RelayServer};

type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start a relay on a random port.
async fn start_relay(echo_to_sender: bool) -> RelayServer {
    start_relay_with(RelayConfig {
        port: 0, // OS-assigned
        hostname: "127.0.0.1".into(),
        echo_to_sender,
        ..RelayConfig::default()
    })
    .await
}

async fn start_relay_with(config: RelayConfig) -> RelayServer {
    RelayServer::start(config).await.expect("Failed to start relay")
}

async fn connect_peer(relay: &RelayServer) -> Ws {
    let url = format!("ws://127.0.0.1:{}/ws", relay.port());
    let (ws, _) = connect_async(&url).await.expect("Failed to connect");
    ws
}

/// Connect `n` peers and wait until the relay has registered all of them.
async fn connect_peers(relay: &RelayServer, n: usize) -> Vec<Ws> {
    let mut peers = Vec::with_capacity(n);
    for _ in 0..n {
        peers.push(connect_peer(relay).await);
    }
    wait_for_peer_count(relay, n).await;
    peers
}

async fn wait_for_peer_count(relay: &RelayServer, n: usize) {
    timeout(Duration::from_secs(5), async {
        while relay.peer_count() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("relay never reached {n} peers (has {})", relay.peer_count()));
}

async fn recv_text(ws: &mut Ws) -> String {
    let msg = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("Timeout waiting for frame")
        .expect("Stream ended")
        .expect("WebSocket error");
    msg.into_text().unwrap().to_string()
}

/// Assert nothing else arrives within a short window.
async fn assert_silent(ws: &mut Ws) {
    if let Ok(Some(Ok(msg))) = timeout(Duration::from_millis(200), ws.next()).await {
        panic!("unexpected frame: {msg:?}");
    }
}

async fn send_text(ws: &mut Ws, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_other_peer_receives_exactly_one_copy() {
    let relay = start_relay(false).await;
    let mut peers = connect_peers(&relay, 4).await;

    let message = r#"{"type":"drone_position","payload":{"x":4,"y":11}}"#;
    send_text(&mut peers[0], message).await;

    for peer in peers.iter_mut().skip(1) {
        assert_eq!(recv_text(peer).await, message);
    }
    for peer in peers.iter_mut() {
        assert_silent(peer).await;
    }
}

#[tokio::test]
async fn payload_is_forwarded_verbatim() {
    let relay = start_relay(false).await;
    let mut peers = connect_peers(&relay, 2).await;

    // Odd spacing and key order must survive untouched
    let message = "{ \"payload\" : {\"y\":2,\"x\":1},\"type\":\"move\" }";
    send_text(&mut peers[0], message).await;
    assert_eq!(recv_text(&mut peers[1]).await, message);

    // Not even JSON: the relay does not care
    send_text(&mut peers[1], "{not json").await;
    assert_eq!(recv_text(&mut peers[0]).await, "{not json");
}

#[tokio::test]
async fn echo_sends_frame_back_to_sender() {
    let relay = start_relay(true).await;
    let mut peers = connect_peers(&relay, 2).await;

    let message = r#"{"type":"move","payload":{"x":1,"y":2}}"#;
    send_text(&mut peers[0], message).await;

    assert_eq!(recv_text(&mut peers[0]).await, message);
    assert_eq!(recv_text(&mut peers[1]).await, message);
}

#[tokio::test]
async fn no_echo_skips_sender() {
    let relay = start_relay(false).await;
    let mut peers = connect_peers(&relay, 2).await;

    send_text(&mut peers[0], r#"{"type":"refresh_page"}"#).await;
    assert_eq!(recv_text(&mut peers[1]).await, r#"{"type":"refresh_page"}"#);
    assert_silent(&mut peers[0]).await;
}

#[tokio::test]
async fn closed_peer_does_not_break_fan_out() {
    let relay = start_relay(false).await;
    let mut peers = connect_peers(&relay, 3).await;

    // Peer 2 goes away right before the broadcast
    let mut leaving = peers.pop().unwrap();
    leaving.close(None).await.unwrap();

    send_text(&mut peers[0], r#"{"type":"vertical_mode_change","payload":true}"#).await;
    assert_eq!(
        recv_text(&mut peers[1]).await,
        r#"{"type":"vertical_mode_change","payload":true}"#
    );

    wait_for_peer_count(&relay, 2).await;

    // Relay is still healthy afterwards
    send_text(&mut peers[1], "after").await;
    assert_eq!(recv_text(&mut peers[0]).await, "after");
}

#[tokio::test]
async fn order_is_preserved_per_sender() {
    let relay = start_relay(false).await;
    let mut peers = connect_peers(&relay, 2).await;

    for i in 0..50 {
        send_text(&mut peers[0], &format!(r#"{{"type":"move","payload":{{"step":{i}}}}}"#)).await;
    }
    for i in 0..50 {
        let parsed: Value = serde_json::from_str(&recv_text(&mut peers[1]).await).unwrap();
        assert_eq!(parsed["payload"]["step"], i);
    }
}

#[tokio::test]
async fn binary_frames_stay_binary() {
    let relay = start_relay(false).await;
    let mut peers = connect_peers(&relay, 2).await;

    let data = vec![0u8, 1, 2, 255];
    peers[0].send(Message::Binary(data.clone().into())).await.unwrap();

    let msg = timeout(Duration::from_secs(5), peers[1].next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Binary(received) => assert_eq!(received.as_ref(), data.as_slice()),
        other => panic!("expected binary frame, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_sends_nothing_to_others() {
    let relay = start_relay(false).await;
    let mut peers = connect_peers(&relay, 2).await;

    let mut leaving = peers.pop().unwrap();
    leaving.close(None).await.unwrap();
    wait_for_peer_count(&relay, 1).await;

    assert_silent(&mut peers[0]).await;
}

#[tokio::test]
async fn health_reports_peers() {
    let relay = start_relay(true).await;
    let _peers = connect_peers(&relay, 3).await;

    let url = format!("http://127.0.0.1:{}/health", relay.port());
    let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body, json!({"status": "ok", "peers": 3, "echo": true}));
}

#[tokio::test]
async fn connection_limit_rejects_excess_peers() {
    let relay = start_relay_with(RelayConfig {
        port: 0,
        hostname: "127.0.0.1".into(),
        max_connections: Some(1),
        ..RelayConfig::default()
    })
    .await;
    let _first = connect_peers(&relay, 1).await;

    let url = format!("ws://127.0.0.1:{}/ws", relay.port());
    let err = connect_async(&url).await.expect_err("second peer should be refused");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 503);
        }
        other => panic!("expected HTTP 503, got {other:?}"),
    }
    assert_eq!(relay.peer_count(), 1);
}

#[tokio::test]
async fn concurrent_upgrades_respect_connection_limit() {
    let relay = start_relay_with(RelayConfig {
        port: 0,
        hostname: "127.0.0.1".into(),
        max_connections: Some(2),
        ..RelayConfig::default()
    })
    .await;

    let url = format!("ws://127.0.0.1:{}/ws", relay.port());
    let attempts = (0..8).map(|_| connect_async(url.clone()));
    let results = futures_util::future::join_all(attempts).await;

    let mut accepted = Vec::new();
    let mut refused = 0;
    for result in results {
        match result {
            Ok((ws, _)) => accepted.push(ws),
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), 503);
                refused += 1;
            }
            Err(other) => panic!("unexpected connect error: {other:?}"),
        }
    }
    assert_eq!(accepted.len(), 2);
    assert_eq!(refused, 6);
    wait_for_peer_count(&relay, 2).await;

    // A freed slot can be taken again
    let mut first = accepted.pop().unwrap();
    first.close(None).await.unwrap();
    wait_for_peer_count(&relay, 1).await;
    timeout(Duration::from_secs(5), async {
        loop {
            if connect_async(url.clone()).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("slot was never released");
}

#[tokio::test]
async fn serves_static_assets_beside_websocket() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("index.html"), "<title>Drone Maze</title>").unwrap();

    let relay = start_relay_with(RelayConfig {
        port: 0,
        hostname: "127.0.0.1".into(),
        static_dir: Some(dir.path().to_path_buf()),
        ..RelayConfig::default()
    })
    .await;

    let url = format!("http://127.0.0.1:{}/", relay.port());
    let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
    assert_eq!(body, "<title>Drone Maze</title>");

    // WebSocket still works on the same port
    let mut peers = connect_peers(&relay, 2).await;
    send_text(&mut peers[0], "hi").await;
    assert_eq!(recv_text(&mut peers[1]).await, "hi");
}

#[tokio::test]
async fn stop_closes_open_peers() {
    let mut relay = start_relay(true).await;
    let mut peers = connect_peers(&relay, 1).await;

    relay.stop().await;
    assert_eq!(relay.peer_count(), 0);

    let next = timeout(Duration::from_secs(5), peers[0].next())
        .await
        .expect("peer should observe shutdown");
    assert!(
        matches!(next, None | Some(Err(_)) | Some(Ok(Message::Close(_)))),
        "unexpected frame after stop: {next:?}"
    );
}
