//! Feed State
//!
//! Connection status of the active price source, shared between the source
//! task and the HTTP readiness probe.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Upstream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Dialing the upstream.
    Connecting,
    /// Producing snapshots.
    Connected,
    /// Waiting out a backoff delay.
    Reconnecting,
    /// Gave up or failed permanently.
    Error,
}

impl ConnectionState {
    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

/// Shared status of a price source.
#[derive(Debug)]
pub struct FeedState {
    source: parking_lot::RwLock<&'static str>,
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    records_received: AtomicU64,
    snapshots_published: AtomicU64,
}

impl FeedState {
    /// Create a disconnected feed state for `source`.
    #[must_use]
    pub const fn new(source: &'static str) -> Self {
        Self {
            source: parking_lot::RwLock::new(source),
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            last_connected_at: parking_lot::RwLock::new(None),
            error_message: parking_lot::RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            records_received: AtomicU64::new(0),
            snapshots_published: AtomicU64::new(0),
        }
    }

    /// Record which source is feeding the hub (changes on fallback).
    pub fn set_source(&self, source: &'static str) {
        *self.source.write() = source;
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
    }

    /// Set an error state with message.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Error;
        *self.error_message.write() = Some(message);
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment upstream records counter.
    pub fn increment_records(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment published snapshots counter.
    pub fn increment_snapshots(&self) {
        self.snapshots_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the source is currently producing snapshots.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.get_state() == ConnectionState::Connected
    }

    /// Point-in-time view for reporting.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            source: *self.source.read(),
            state: self.get_state(),
            last_connected_at: *self.last_connected_at.read(),
            error: self.error_message.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            records_received: self.records_received.load(Ordering::Relaxed),
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
        }
    }
}

/// Serializable feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    /// Source name.
    pub source: &'static str,
    /// Connection state.
    pub state: ConnectionState,
    /// Last successful connection.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last error, cleared on connect.
    pub error: Option<String>,
    /// Attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Upstream records accepted.
    pub records_received: u64,
    /// Snapshots handed to subscribers.
    pub snapshots_published: u64,
}
