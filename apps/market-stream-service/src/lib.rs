#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream Service - Real-time Price Fan-out
//!
//! Pushes periodic price snapshots from a single upstream source to many
//! WebSocket subscribers. Slow consumers are evicted instead of slowing
//! anyone else down.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Price records and admission control
//!   - `price`: `Price` and `PriceSnapshot`
//!   - `admission`: Sliding-window per-key rate limiter
//!
//! - **Application**: Port definitions
//!   - `ports`: `PriceSource`, `PriceHandler`, subscriptions
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `hub`: Single-owner client registry and broadcast loop
//!   - `client`: Bounded outbound queue and socket tasks per connection
//!   - `synthetic` / `binance`: Price sources
//!   - `http`: WebSocket upgrade, health and metrics routes
//!   - `config`, `metrics`, `telemetry`: Ambient concerns
//!
//! # Data Flow
//!
//! ```text
//! PriceSource ──► Hub (encode once) ──┬──► client queue ──► socket 1
//!                                     ├──► client queue ──► socket 2
//!                                     └──► client queue ──► socket N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Price model and admission control.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::admission::{Admission, RateLimitConfig, RateLimiter};
pub use domain::price::{Price, PriceSnapshot, SnapshotError};

// Ports
pub use application::ports::{PriceHandler, PriceObservers, PriceSource, PriceSubscription};

// Hub and clients (for integration tests)
pub use infrastructure::client::{Client, ClientConfig, ClientHandle, ClientId, ClientState, EnqueueError};
pub use infrastructure::hub::Hub;

// Sources
pub use infrastructure::binance::{BinanceClient, BinanceClientConfig, BinanceClientError};
pub use infrastructure::synthetic::{SyntheticGenerator, SyntheticSource};

// Codec
pub use infrastructure::codec::{CodecError, SnapshotCodec};

// Configuration
pub use infrastructure::config::{
    AdmissionSettings, ClientSettings, ConfigError, FeedSettings, ServerSettings, ServiceConfig,
    SourceKind,
};

// HTTP
pub use infrastructure::feed::{ConnectionState, FeedState, FeedStatus};
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, create_router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
