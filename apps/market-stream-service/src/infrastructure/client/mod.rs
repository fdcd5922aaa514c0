//! Subscriber Connections
//!
//! One [`Client`] per upgraded WebSocket. Each client runs two tasks:
//!
//! - **inbound**: reads frames to detect close, errors and idleness; any frame
//!   refreshes the idle deadline and application data is ignored
//! - **outbound**: drains the private bounded queue to the socket under a write
//!   timeout and sends keepalive pings
//!
//! The hub only ever holds a [`ClientHandle`]: the queue sender plus the
//! shared lifecycle. Removing the handle from the registry drops the sender and
//! cancels the connection token, which unblocks both tasks even mid-read or
//! mid-write.
//!
//! # State Machine
//!
//! ```text
//! Connected ──(eof / error / idle / eviction)──► Closing ──(both tasks exited)──► Closed
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::infrastructure::config::ClientSettings;
use crate::infrastructure::hub::Hub;

// =============================================================================
// Identity & State
// =============================================================================

/// Unique identity of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Registered and streaming.
    Connected,
    /// Terminal condition seen; tasks are winding down.
    Closing,
    /// Both tasks have exited.
    Closed,
}

impl ClientState {
    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: Mutex<ClientState>,
    cancel: CancellationToken,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: Mutex::new(ClientState::Connected),
            cancel: CancellationToken::new(),
        }
    }

    /// Move to Closing and cancel. Returns false if already past Connected.
    fn begin_close(&self) -> bool {
        let first = {
            let mut state = self.state.lock();
            if *state == ClientState::Connected {
                *state = ClientState::Closing;
                true
            } else {
                false
            }
        };
        self.cancel.cancel();
        first
    }

    fn mark_closed(&self) {
        *self.state.lock() = ClientState::Closed;
        self.cancel.cancel();
    }

    fn state(&self) -> ClientState {
        *self.state.lock()
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Per-connection parameters.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Outbound queue capacity in frames.
    pub outbound_capacity: usize,
    /// Keepalive ping interval.
    pub ping_interval: Duration,
    /// Disconnect after this long without any inbound frame.
    pub idle_timeout: Duration,
    /// Maximum time for a single frame write.
    pub write_timeout: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            outbound_capacity: settings.queue_capacity.max(1),
            ping_interval: settings.ping_interval,
            idle_timeout: settings.idle_timeout,
            write_timeout: settings.write_timeout,
            max_message_size: settings.max_message_bytes,
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue is at capacity.
    Full,
    /// Outbound task has gone away.
    Closed,
}

/// The hub's view of a client: identity, queue sender and lifecycle.
///
/// Only the hub writes to the outbound queue; code outside the crate can
/// register, inspect and close a handle but not enqueue frames.
///
/// ```compile_fail
/// use axum::extract::ws::Utf8Bytes;
/// use market_stream_service::{Client, ClientConfig};
///
/// let (_client, handle) = Client::new(ClientConfig::default());
/// let _ = handle.try_enqueue(Utf8Bytes::from_static("frame"));
/// ```
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Utf8Bytes>,
    lifecycle: Arc<Lifecycle>,
}

impl ClientHandle {
    /// Client identity.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Remote address, when known.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.lifecycle.state()
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns `EnqueueError::Full` when the queue is at capacity and
    /// `EnqueueError::Closed` when the outbound task has exited.
    pub(crate) fn try_enqueue(&self, frame: Utf8Bytes) -> Result<(), EnqueueError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Move the client to Closing and cancel its tasks.
    ///
    /// Returns `false` if the client was already closing.
    pub fn begin_close(&self) -> bool {
        self.lifecycle.begin_close()
    }

    /// Whether `other` refers to the same connection.
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.lifecycle, &other.lifecycle)
    }
}

// =============================================================================
// Client
// =============================================================================

/// One subscriber connection, owning the receiving end of its outbound queue.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    peer: Option<SocketAddr>,
    config: ClientConfig,
    outbound: mpsc::Receiver<Utf8Bytes>,
    lifecycle: Arc<Lifecycle>,
}

impl Client {
    /// Create a client and the handle to register with the hub.
    #[must_use]
    pub fn new(config: ClientConfig) -> (Self, ClientHandle) {
        Self::build(config, None)
    }

    /// Create a client for a known remote address.
    #[must_use]
    pub fn with_peer(config: ClientConfig, peer: SocketAddr) -> (Self, ClientHandle) {
        Self::build(config, Some(peer))
    }

    fn build(config: ClientConfig, peer: Option<SocketAddr>) -> (Self, ClientHandle) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(config.outbound_capacity.max(1));
        let lifecycle = Arc::new(Lifecycle::new());

        let handle = ClientHandle {
            id,
            peer,
            outbound: tx,
            lifecycle: Arc::clone(&lifecycle),
        };
        let client = Self {
            id,
            peer,
            config,
            outbound: rx,
            lifecycle,
        };
        (client, handle)
    }

    /// Client identity.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.lifecycle.state()
    }

    /// Whether the connection has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.cancel.is_cancelled()
    }

    /// Wait for the next queued frame, for transports that drain the queue
    /// themselves. Returns `None` once the hub has released the client.
    pub async fn next_frame(&mut self) -> Option<Utf8Bytes> {
        self.outbound.recv().await
    }

    /// Take a queued frame if one is ready.
    pub fn try_next_frame(&mut self) -> Option<Utf8Bytes> {
        self.outbound.try_recv().ok()
    }

    /// Drive the connection until it closes.
    ///
    /// Spawns the inbound and outbound tasks and returns once both have
    /// exited, leaving the client `Closed`.
    pub async fn run(self, socket: WebSocket, hub: Hub) {
        let (sink, stream) = socket.split();
        self.run_split(sink, stream, hub).await;
    }

    async fn run_split<W, R>(self, sink: W, stream: R, hub: Hub)
    where
        W: Sink<Message, Error = axum::Error> + Unpin + Send + 'static,
        R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
    {
        let Self {
            id,
            peer,
            config,
            outbound,
            lifecycle,
        } = self;

        tracing::debug!(client_id = %id, peer = ?peer, "Client connected");

        let inbound = tokio::spawn(read_loop(
            id,
            stream,
            hub.clone(),
            Arc::clone(&lifecycle),
            config.idle_timeout,
        ));
        let outbound = tokio::spawn(write_loop(
            id,
            sink,
            outbound,
            hub.clone(),
            Arc::clone(&lifecycle),
            config,
        ));

        let (inbound_result, outbound_result) = tokio::join!(inbound, outbound);
        if let Err(e) = inbound_result {
            tracing::error!(client_id = %id, error = %e, "Inbound task failed");
        }
        if let Err(e) = outbound_result {
            tracing::error!(client_id = %id, error = %e, "Outbound task failed");
        }

        // Either task may have exited on a path that never reached the hub.
        hub.unregister(id);
        lifecycle.mark_closed();
        tracing::debug!(client_id = %id, "Client closed");
    }
}

// =============================================================================
// Connection Tasks
// =============================================================================

/// Why the inbound side stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundExit {
    PeerClosed,
    StreamEnded,
    ReadError,
    IdleTimeout,
    Cancelled,
}

async fn read_loop<R>(
    id: ClientId,
    mut stream: R,
    hub: Hub,
    lifecycle: Arc<Lifecycle>,
    idle_timeout: Duration,
) where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let exit = loop {
        let next = tokio::select! {
            () = lifecycle.cancel.cancelled() => break InboundExit::Cancelled,
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        match next {
            Err(_elapsed) => break InboundExit::IdleTimeout,
            Ok(None) => break InboundExit::StreamEnded,
            Ok(Some(Err(e))) => {
                tracing::debug!(client_id = %id, error = %e, "Client read error");
                break InboundExit::ReadError;
            }
            Ok(Some(Ok(Message::Close(frame)))) => {
                tracing::debug!(client_id = %id, frame = ?frame, "Client sent close frame");
                break InboundExit::PeerClosed;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                tracing::debug!(client_id = %id, len = text.len(), "Ignoring client text frame");
            }
            Ok(Some(Ok(Message::Binary(data)))) => {
                tracing::debug!(client_id = %id, len = data.len(), "Ignoring client binary frame");
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
        }
    };

    if exit != InboundExit::Cancelled {
        tracing::debug!(client_id = %id, reason = ?exit, "Client inbound finished");
        lifecycle.begin_close();
        hub.unregister(id);
    }
}

async fn write_loop<W>(
    id: ClientId,
    mut sink: W,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    hub: Hub,
    lifecycle: Arc<Lifecycle>,
    config: ClientConfig,
) where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    let start = tokio::time::Instant::now() + config.ping_interval;
    let mut ping = tokio::time::interval_at(start, config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            biased;
            () = lifecycle.cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(text) => Message::Text(text),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        if let Err(e) = send_with_timeout(&mut sink, message, config.write_timeout).await {
            tracing::debug!(client_id = %id, error = %e, "Client write failed");
            lifecycle.begin_close();
            hub.unregister(id);
            break;
        }
    }

    let close = Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static("closing"),
    }));
    let _ = tokio::time::timeout(config.write_timeout, async {
        sink.send(close).await?;
        sink.close().await
    })
    .await;
}

async fn send_with_timeout<W>(
    sink: &mut W,
    message: Message,
    limit: Duration,
) -> Result<(), WriteError>
where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriteError::Socket(e)),
        Err(_) => Err(WriteError::Timeout(limit)),
    }
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("socket error: {0}")]
    Socket(axum::Error),

    #[error("write timed out after {0:?}")]
    Timeout(Duration),
}

// =============================================================================
// Tests
// =============================================================================
