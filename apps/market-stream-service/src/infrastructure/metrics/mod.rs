//! Prometheus Metrics Module
//!
//! Exposes fan-out and admission metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Clients**: connected subscriber gauge, evictions by reason
//! - **Broadcasts**: snapshots fanned out, frames enqueued
//! - **Admission**: upgrade attempts by outcome
//! - **Feed**: upstream reconnects and dropped records
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Subsequent calls return the handle installed by the first call.
///
/// # Errors
///
/// Returns `BuildError` if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_gauge!(
        "market_stream_clients_connected",
        "Number of subscribers currently registered with the hub"
    );
    describe_counter!(
        "market_stream_clients_evicted_total",
        "Subscribers removed by the hub, by reason"
    );

    describe_counter!(
        "market_stream_broadcasts_total",
        "Price snapshots fanned out to subscribers"
    );
    describe_counter!(
        "market_stream_frames_enqueued_total",
        "Encoded frames placed on subscriber outbound queues"
    );

    describe_counter!(
        "market_stream_admissions_total",
        "WebSocket upgrade attempts by admission outcome"
    );

    describe_counter!(
        "market_stream_feed_reconnects_total",
        "Upstream feed reconnection attempts"
    );
    describe_counter!(
        "market_stream_feed_records_dropped_total",
        "Upstream records dropped as malformed"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why the hub removed a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Outbound queue was full.
    SlowConsumer,
    /// Outbound task had already exited.
    Disconnected,
    /// Connection asked to leave.
    Unregistered,
    /// Hub shut down.
    Shutdown,
}

impl EvictionReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SlowConsumer => "slow_consumer",
            Self::Disconnected => "disconnected",
            Self::Unregistered => "unregistered",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Admission outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Upgrade allowed.
    Allowed,
    /// Upgrade rejected by the rate limiter.
    Denied,
}

impl AdmissionOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
        }
    }
}

/// Update the connected subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients_connected(count: usize) {
    gauge!("market_stream_clients_connected").set(count as f64);
}

/// Record a subscriber removal.
pub fn record_eviction(reason: EvictionReason) {
    counter!(
        "market_stream_clients_evicted_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record one fan-out and the number of frames it enqueued.
pub fn record_broadcast(frames: u64) {
    counter!("market_stream_broadcasts_total").increment(1);
    counter!("market_stream_frames_enqueued_total").increment(frames);
}

/// Record an admission decision.
pub fn record_admission(outcome: AdmissionOutcome) {
    counter!(
        "market_stream_admissions_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_feed_reconnect(source: &'static str) {
    counter!(
        "market_stream_feed_reconnects_total",
        "source" => source
    )
    .increment(1);
}

/// Record an upstream record dropped as malformed.
pub fn record_feed_record_dropped(source: &'static str) {
    counter!(
        "market_stream_feed_records_dropped_total",
        "source" => source
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_reason_as_str() {
        assert_eq!(EvictionReason::SlowConsumer.as_str(), "slow_consumer");
        assert_eq!(EvictionReason::Disconnected.as_str(), "disconnected");
        assert_eq!(EvictionReason::Unregistered.as_str(), "unregistered");
        assert_eq!(EvictionReason::Shutdown.as_str(), "shutdown");
    }

    #[test]
    fn admission_outcome_as_str() {
        assert_eq!(AdmissionOutcome::Allowed.as_str(), "allowed");
        assert_eq!(AdmissionOutcome::Denied.as_str(), "denied");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        set_clients_connected(3);
        record_eviction(EvictionReason::SlowConsumer);
        record_broadcast(7);
        record_admission(AdmissionOutcome::Denied);
    }
}
