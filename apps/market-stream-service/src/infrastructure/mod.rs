//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete price sources, the connection hub and the HTTP surface that
//! clients connect through.

/// Binance live trade feed.
pub mod binance;

/// Per-connection state and socket tasks.
pub mod client;

/// Wire encoding for price snapshots.
pub mod codec;

/// Configuration loading.
pub mod config;

/// Upstream feed status tracking.
pub mod feed;

/// HTTP routes, middleware and server.
pub mod http;

/// Fan-out hub.
pub mod hub;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Synthetic price generator.
pub mod synthetic;

/// OpenTelemetry tracing integration.
pub mod telemetry;
