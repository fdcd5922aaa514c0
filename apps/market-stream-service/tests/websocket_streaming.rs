//! WebSocket Streaming Integration Tests
//!
//! Runs the real HTTP server on an ephemeral port and talks to it with a
//! tungstenite client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use market_stream_service::{
    AppState, ClientConfig, FeedState, Hub, HttpServer, RateLimitConfig, RateLimiter,
    SnapshotCodec, SyntheticGenerator,
};

struct TestServer {
    addr: SocketAddr,
    hub: Hub,
    cancel: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start_server(limit: usize, client: ClientConfig) -> TestServer {
    let cancel = CancellationToken::new();
    let (hub, _hub_task) = Hub::spawn(cancel.clone());
    let state = AppState {
        hub: hub.clone(),
        limiter: Arc::new(RateLimiter::new(RateLimitConfig::new(
            limit,
            Duration::from_secs(60),
        ))),
        feed: Arc::new(FeedState::new("synthetic")),
        client,
        service_name: Arc::from("market-stream-service"),
        trust_forwarded_for: false,
    };

    let server = HttpServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)), state, cancel.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        server.serve().await.unwrap();
    });

    TestServer { addr, hub, cancel }
}

async fn wait_for_count(hub: &Hub, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while hub.client_count().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("client count never reached {expected}"));
}

#[tokio::test]
async fn connected_client_receives_broadcast_frames() {
    let server = start_server(10, ClientConfig::default()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    wait_for_count(&server.hub, 1).await;

    let snapshot = SyntheticGenerator::with_seed(3)
        .next_snapshot(Utc::now())
        .unwrap();
    server.hub.broadcast_prices(snapshot.clone());

    let frame = timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };
    let decoded = SnapshotCodec::new().decode(text.as_str()).unwrap();
    assert_eq!(decoded, snapshot);
}

#[tokio::test]
async fn closing_the_socket_unregisters_the_client() {
    let server = start_server(10, ClientConfig::default()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    wait_for_count(&server.hub, 1).await;

    socket.close(None).await.unwrap();
    wait_for_count(&server.hub, 0).await;
}

#[tokio::test]
async fn upgrades_over_the_limit_get_429() {
    let server = start_server(1, ClientConfig::default()).await;
    let url = format!("ws://{}/ws", server.addr);

    let (_first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    wait_for_count(&server.hub, 1).await;

    match tokio_tungstenite::connect_async(url.as_str()).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 429);
            assert!(response.headers().contains_key("retry-after"));
        }
        Err(e) => panic!("expected HTTP 429, got {e}"),
        Ok(_) => panic!("upgrade over the limit was accepted"),
    }

    // The rejected attempt never reached the hub.
    assert_eq!(server.hub.client_count().await, 1);
}

#[tokio::test]
async fn silent_client_is_dropped_after_idle_timeout() {
    let config = ClientConfig {
        ping_interval: Duration::from_millis(100),
        idle_timeout: Duration::from_millis(300),
        ..ClientConfig::default()
    };
    let server = start_server(10, config).await;

    // Never polled, so pings go unanswered.
    let (_socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    wait_for_count(&server.hub, 1).await;

    wait_for_count(&server.hub, 0).await;
}

#[tokio::test]
async fn oversized_client_message_closes_connection() {
    let server = start_server(10, ClientConfig::default()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    wait_for_count(&server.hub, 1).await;

    let _ = socket.send(Message::text("x".repeat(4096))).await;
    wait_for_count(&server.hub, 0).await;
}

#[tokio::test]
async fn shutdown_disconnects_clients() {
    let server = start_server(10, ClientConfig::default()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    wait_for_count(&server.hub, 1).await;

    server.cancel.cancel();

    let ended = timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}
