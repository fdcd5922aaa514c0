//! Binance Feed Integration Tests
//!
//! Drives the Binance client against a local tungstenite server standing in
//! for the exchange.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use market_stream_service::infrastructure::binance::ReconnectConfig;
use market_stream_service::{
    BinanceClient, BinanceClientConfig, BinanceClientError, ConnectionState, FeedState,
    PriceSnapshot, PriceSource,
};

fn config(url: String) -> BinanceClientConfig {
    BinanceClientConfig {
        url,
        pairs: vec!["btcusdt".to_string(), "ethusdt".to_string()],
        publish_interval: Duration::from_millis(50),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 2,
        },
    }
}

fn trade(symbol: &str, price: &str) -> Message {
    Message::text(format!(
        r#"{{"e":"trade","E":1700000000000,"s":"{symbol}","t":1,"p":"{price}","q":"0.5","T":1700000000000}}"#
    ))
}

#[tokio::test]
async fn trades_are_published_as_snapshots() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let exchange = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(trade("BTCUSDT", "95000.10")).await.unwrap();
        ws.send(Message::text("not json")).await.unwrap();
        ws.send(trade("ETHUSDT", "3500.00")).await.unwrap();
        // Hold the connection open until the test finishes.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let cancel = CancellationToken::new();
    let feed = Arc::new(FeedState::new(BinanceClient::NAME));
    let client = Arc::new(BinanceClient::new(
        config(format!("ws://{addr}/ws")),
        Arc::clone(&feed),
        cancel.clone(),
    ));

    let received: Arc<Mutex<Vec<PriceSnapshot>>> = Arc::default();
    let sink = Arc::clone(&received);
    let _subscription = client.subscribe(Arc::new(move |s: &PriceSnapshot| {
        sink.lock().push(s.clone());
    }));

    let stream = client.connect().await.unwrap();
    let task = tokio::spawn(Arc::clone(&client).run(Some(stream)));

    timeout(Duration::from_secs(5), async {
        loop {
            if received.lock().iter().any(|s| s.len() == 2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("snapshot with both symbols");

    assert!(feed.is_connected());
    let latest = received.lock().last().cloned().unwrap();
    assert_eq!(latest.get("BTC").unwrap().price.to_string(), "95000.10");
    assert_eq!(latest.get("ETH").unwrap().price.to_string(), "3500.00");
    assert_eq!(feed.status().records_received, 2);

    cancel.cancel();
    timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(feed.get_state(), ConnectionState::Disconnected);
    exchange.abort();
}

#[tokio::test]
async fn initial_connect_failure_is_reported() {
    // Bind then drop to get a port with nothing listening.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let client = BinanceClient::new(
        config(format!("ws://{addr}/ws")),
        Arc::new(FeedState::new(BinanceClient::NAME)),
        CancellationToken::new(),
    );

    assert!(client.connect().await.is_err());
}

#[tokio::test]
async fn gives_up_after_max_reconnect_attempts() {
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let feed = Arc::new(FeedState::new(BinanceClient::NAME));
    let client = Arc::new(BinanceClient::new(
        config(format!("ws://{addr}/ws")),
        Arc::clone(&feed),
        CancellationToken::new(),
    ));

    let result = timeout(Duration::from_secs(5), client.run(None))
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(BinanceClientError::MaxReconnectAttemptsExceeded(2))
    ));

    let status = feed.status();
    assert_eq!(status.reconnect_attempts, 2);
    assert!(status.error.is_some());
}
