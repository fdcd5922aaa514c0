//! Hub Fan-out Integration Tests
//!
//! Registry membership, exactly-once delivery and slow-consumer eviction.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use market_stream_service::{
    Client, ClientConfig, ClientState, Hub, Price, PriceSnapshot, SnapshotCodec,
    SyntheticGenerator,
};

fn config(capacity: usize) -> ClientConfig {
    ClientConfig {
        outbound_capacity: capacity,
        ..ClientConfig::default()
    }
}

fn eight_symbols() -> PriceSnapshot {
    SyntheticGenerator::with_seed(7)
        .next_snapshot(Utc::now())
        .unwrap()
}

#[tokio::test]
async fn every_client_receives_each_broadcast_once() {
    let (hub, _task) = Hub::spawn(CancellationToken::new());
    let mut clients = Vec::new();
    for _ in 0..3 {
        let (client, handle) = Client::new(config(8));
        hub.register(handle);
        clients.push(client);
    }

    hub.broadcast_prices(eight_symbols());
    assert_eq!(hub.client_count().await, 3);

    let codec = SnapshotCodec::new();
    for client in &mut clients {
        let frame = client.try_next_frame().expect("one frame per client");
        let decoded = codec.decode(frame.as_str()).unwrap();
        assert_eq!(decoded.len(), 8);
        assert!(client.try_next_frame().is_none());
    }
}

#[tokio::test]
async fn full_queue_evicts_only_the_slow_client() {
    let (hub, _task) = Hub::spawn(CancellationToken::new());
    let (_slow, slow_handle) = Client::new(config(2));
    let (mut fast, fast_handle) = Client::new(config(8));
    hub.register(slow_handle.clone());
    hub.register(fast_handle);

    for _ in 0..3 {
        hub.broadcast_prices(eight_symbols());
        // Keep the fast client drained between broadcasts.
        let _ = hub.client_count().await;
        while fast.try_next_frame().is_some() {}
    }

    assert_eq!(hub.client_count().await, 1);
    assert_eq!(slow_handle.state(), ClientState::Closing);
    assert_eq!(fast.state(), ClientState::Connected);
}

#[tokio::test]
async fn single_slow_client_is_evicted_on_third_broadcast() {
    let (hub, _task) = Hub::spawn(CancellationToken::new());
    let (slow, handle) = Client::new(config(2));
    hub.register(handle);

    hub.broadcast_prices(eight_symbols());
    hub.broadcast_prices(eight_symbols());
    assert_eq!(hub.client_count().await, 1);

    hub.broadcast_prices(eight_symbols());
    assert_eq!(hub.client_count().await, 0);
    assert!(slow.is_cancelled());
}

#[tokio::test]
async fn wire_frame_reconstructs_the_snapshot() {
    let (hub, _task) = Hub::spawn(CancellationToken::new());
    let (mut client, handle) = Client::new(config(4));
    hub.register(handle);

    let snapshot = PriceSnapshot::new(vec![Price::new(
        "BTC",
        Decimal::from_str("95000.00").unwrap(),
        Decimal::from_str("1.25").unwrap(),
        Decimal::from_str("1234567.89").unwrap(),
        Utc::now(),
    )])
    .unwrap();

    hub.broadcast_prices(snapshot.clone());
    let _ = hub.client_count().await;

    let frame = client.try_next_frame().unwrap();
    let value: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
    let record = &value["prices"][0];
    assert_eq!(record["symbol"], "BTC");
    assert!(record["price"].is_number());
    assert_eq!(record["change24h"].as_f64(), Some(1.25));
    assert!(frame.as_str().contains(r#""price":95000.00,"#));
    assert_eq!(SnapshotCodec::new().decode(frame.as_str()).unwrap(), snapshot);
}

#[tokio::test]
async fn synthetic_frame_carries_numeric_prices_array() {
    let (hub, _task) = Hub::spawn(CancellationToken::new());
    let (mut client, handle) = Client::new(config(4));
    hub.register(handle);

    hub.broadcast_prices(eight_symbols());
    let _ = hub.client_count().await;

    let frame = client.try_next_frame().unwrap();
    let value: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
    let prices = value["prices"].as_array().unwrap();
    assert_eq!(prices.len(), 8);
    for record in prices {
        assert!(record["symbol"].is_string());
        assert!(record["price"].as_f64().is_some_and(|p| p > 0.0));
        assert!(record["change24h"].is_number());
        assert!(record["volume"].is_number());
        assert!(record["timestamp"].is_string());
    }
}

#[tokio::test]
async fn count_equals_registrations_minus_unregistrations() {
    let (hub, _task) = Hub::spawn(CancellationToken::new());

    let mut tasks = Vec::new();
    for i in 0..32 {
        let hub = hub.clone();
        tasks.push(tokio::spawn(async move {
            let (client, handle) = Client::new(config(4));
            let id = handle.id();
            hub.register(handle);
            if i % 4 == 0 {
                hub.unregister(id);
                // Twice on purpose; the second is a no-op.
                hub.unregister(id);
            }
            client
        }));
    }

    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap());
    }

    assert_eq!(hub.client_count().await, 24);
    let closing = clients
        .iter()
        .filter(|c| c.state() == ClientState::Closing)
        .count();
    assert_eq!(closing, 8);
}

#[tokio::test]
async fn unregistered_client_receives_nothing_further() {
    let (hub, _task) = Hub::spawn(CancellationToken::new());
    let (mut client, handle) = Client::new(config(4));
    let id = handle.id();
    hub.register(handle);

    hub.broadcast_prices(eight_symbols());
    hub.unregister(id);
    hub.broadcast_prices(eight_symbols());
    let _ = hub.client_count().await;

    assert!(client.try_next_frame().is_some());
    assert!(client.try_next_frame().is_none());
}
