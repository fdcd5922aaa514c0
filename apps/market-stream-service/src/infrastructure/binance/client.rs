//! Binance Trade Stream Client
//!
//! Keeps one connection to the Binance public trade stream for all tracked
//! pairs, folds trades into a [`PriceBook`] and publishes a snapshot to
//! subscribers on every tick while connected.
//!
//! # Stream URL
//!
//! `wss://stream.binance.com:9443/ws/btcusdt@trade/ethusdt@trade/...`
//!
//! Connection loss triggers exponential backoff; snapshots pause until the
//! stream is back.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::book::PriceBook;
use super::codec::TradeCodec;
use super::messages::trade_streams;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{PriceHandler, PriceObservers, PriceSource, PriceSubscription};
use crate::infrastructure::config::FeedSettings;
use crate::infrastructure::feed::{ConnectionState, FeedState};
use crate::infrastructure::metrics;

/// Connected upstream socket.
pub type TradeStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the Binance client.
#[derive(Debug, thiserror::Error)]
pub enum BinanceClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server closed the stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Binance client.
#[derive(Debug, Clone)]
pub struct BinanceClientConfig {
    /// Base stream URL, without the stream path.
    pub url: String,
    /// Lowercase trading pairs.
    pub pairs: Vec<String>,
    /// Snapshot publication interval.
    pub publish_interval: Duration,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl BinanceClientConfig {
    /// Full stream URL for all pairs.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            trade_streams(&self.pairs)
        )
    }
}

impl From<&FeedSettings> for BinanceClientConfig {
    fn from(settings: &FeedSettings) -> Self {
        Self {
            url: settings.binance_url.clone(),
            pairs: settings.binance_pairs.clone(),
            publish_interval: settings.tick_interval,
            reconnect: ReconnectConfig::from(settings),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Live price source backed by the Binance trade stream.
pub struct BinanceClient {
    config: BinanceClientConfig,
    codec: TradeCodec,
    book: Mutex<PriceBook>,
    observers: PriceObservers,
    feed: Arc<FeedState>,
    cancel: CancellationToken,
}

impl BinanceClient {
    /// Source name used in logs and metrics.
    pub const NAME: &'static str = "binance";

    /// Create a new Binance client.
    #[must_use]
    pub fn new(config: BinanceClientConfig, feed: Arc<FeedState>, cancel: CancellationToken) -> Self {
        let book = PriceBook::new(&config.pairs);
        Self {
            config,
            codec: TradeCodec::new(),
            book: Mutex::new(book),
            observers: PriceObservers::new(),
            feed,
            cancel,
        }
    }

    /// Open the upstream stream once.
    ///
    /// # Errors
    ///
    /// Returns `BinanceClientError::WebSocket` if the handshake fails.
    pub async fn connect(&self) -> Result<TradeStream, BinanceClientError> {
        let url = self.config.stream_url();
        self.feed.set_source(Self::NAME);
        self.feed.set_state(ConnectionState::Connecting);
        tracing::info!(url = %url, "Connecting to Binance stream");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(stream)
    }

    /// Run the connection loop until cancelled or retries are exhausted.
    ///
    /// `initial` is an already-open stream to use for the first session.
    ///
    /// # Errors
    ///
    /// Returns `MaxReconnectAttemptsExceeded` when the backoff policy gives up.
    pub async fn run(self: Arc<Self>, initial: Option<TradeStream>) -> Result<(), BinanceClientError> {
        self.feed.set_source(Self::NAME);
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut pending = initial;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Binance client cancelled");
                self.feed.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            let session = match pending.take() {
                Some(stream) => Ok(stream),
                None => self.connect().await,
            };
            let outcome = match session {
                Ok(stream) => {
                    policy.reset();
                    self.stream_trades(stream).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    tracing::info!("Binance stream closed");
                    self.feed.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Binance connection error");
                    self.feed.set_state(ConnectionState::Disconnected);

                    let Some(delay) = policy.next_delay() else {
                        let attempts = policy.attempt_count();
                        self.feed.set_error(format!("gave up after {attempts} attempts: {e}"));
                        return Err(BinanceClientError::MaxReconnectAttemptsExceeded(attempts));
                    };

                    let attempt = policy.attempt_count();
                    tracing::info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting to Binance stream"
                    );
                    self.feed.set_state(ConnectionState::Reconnecting);
                    self.feed.increment_reconnect_attempts();
                    metrics::record_feed_reconnect(Self::NAME);

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Binance client cancelled during reconnect delay");
                            self.feed.set_state(ConnectionState::Disconnected);
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Read trades and publish on every tick until the stream ends.
    async fn stream_trades(&self, stream: TradeStream) -> Result<(), BinanceClientError> {
        self.feed.set_state(ConnectionState::Connected);
        tracing::info!(pairs = self.config.pairs.len(), "Binance stream connected");

        let (mut write, mut read) = stream.split();
        let interval = self.config.publish_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.publish();
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Binance sent close frame");
                            return Err(BinanceClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Binance stream ended");
                            return Err(BinanceClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(Some(trade)) => {
                let applied = self.book.lock().apply(&trade);
                match applied {
                    Ok(()) => self.feed.increment_records(),
                    Err(reason) => {
                        tracing::debug!(symbol = %trade.symbol, reason = ?reason, "Trade skipped");
                        metrics::record_feed_record_dropped(Self::NAME);
                    }
                }
            }
            Ok(None) => tracing::trace!("Ignoring non-trade event"),
            Err(e) => {
                tracing::debug!(error = %e, "Malformed Binance frame dropped");
                metrics::record_feed_record_dropped(Self::NAME);
            }
        }
    }

    /// Publish the current book to subscribers.
    ///
    /// Returns the number of handlers notified; nothing is published until
    /// at least one pair has traded.
    pub fn publish(&self) -> usize {
        let snapshot = self.book.lock().snapshot();
        match snapshot {
            Ok(snapshot) if snapshot.is_empty() => 0,
            Ok(snapshot) => {
                self.feed.increment_snapshots();
                self.observers.publish(&snapshot)
            }
            Err(e) => {
                tracing::error!(error = %e, "Price book snapshot rejected");
                0
            }
        }
    }
}

impl PriceSource for BinanceClient {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn subscribe(&self, handler: Arc<dyn PriceHandler>) -> PriceSubscription {
        self.observers.subscribe(handler)
    }
}
