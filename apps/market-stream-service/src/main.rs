//! Market Stream Service Binary
//!
//! Starts the price fan-out server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-service
//! ```
//!
//! # Environment Variables
//!
//! - `PORT`: HTTP/WebSocket port (default: 3002)
//! - `USE_REAL_API`: `true` streams from Binance, otherwise synthetic prices
//! - `MARKET_STREAM_RATE_LIMIT`: Upgrades per IP per window (default: 100)
//! - `MARKET_STREAM_RATE_WINDOW_SECS`: Admission window (default: 60)
//! - `MARKET_STREAM_TRUST_FORWARDED_FOR`: Key admission on proxy headers (default: false)
//! - `MARKET_STREAM_CLIENT_QUEUE_CAPACITY`: Per-client outbound frames (default: 256)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_stream_service::application::ports::{PriceSource, PriceSubscription};
use market_stream_service::infrastructure::binance::{BinanceClient, BinanceClientConfig};
use market_stream_service::infrastructure::http::{AppState, HttpServer, spawn_limiter_janitor};
use market_stream_service::infrastructure::synthetic::{SyntheticGenerator, SyntheticSource};
use market_stream_service::infrastructure::telemetry;
use market_stream_service::{
    ClientConfig, FeedSettings, FeedState, Hub, RateLimitConfig, RateLimiter, ServiceConfig,
    SourceKind, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Market Stream Service");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable, metrics disabled");
    }

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let (hub, hub_task) = Hub::spawn(shutdown_token.clone());

    let feed_state = Arc::new(FeedState::new(config.feed.source.as_str()));
    let _subscription = start_source(
        &config.feed,
        Arc::clone(&feed_state),
        &hub,
        shutdown_token.clone(),
    )
    .await;

    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(
        config.admission.limit,
        config.admission.window,
    )));
    let janitor = spawn_limiter_janitor(
        Arc::clone(&limiter),
        config.admission.cleanup_interval,
        shutdown_token.clone(),
    );

    let state = AppState {
        hub: hub.clone(),
        limiter,
        feed: feed_state,
        client: ClientConfig::from(&config.client),
        service_name: Arc::from(config.server.service_name.as_str()),
        trust_forwarded_for: config.admission.trust_forwarded_for,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let server = HttpServer::bind(addr, state, shutdown_token.clone()).await?;
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!(port = config.server.port, "Market stream service ready");

    await_shutdown(shutdown_token).await;

    let drain = async {
        let _ = server_task.await;
        let _ = hub_task.await;
        let _ = janitor.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("Shutdown timed out, exiting anyway");
    }

    tracing::info!("Market stream service stopped");
    Ok(())
}

/// Start the configured price source and attach the hub to it.
///
/// A live feed that cannot make its first connection is replaced by the
/// synthetic generator.
async fn start_source(
    settings: &FeedSettings,
    feed_state: Arc<FeedState>,
    hub: &Hub,
    cancel: CancellationToken,
) -> PriceSubscription {
    if settings.source == SourceKind::Binance {
        let client = Arc::new(BinanceClient::new(
            BinanceClientConfig::from(settings),
            Arc::clone(&feed_state),
            cancel.clone(),
        ));

        match client.connect().await {
            Ok(stream) => {
                let subscription = client.subscribe(Arc::new(hub.clone()));
                tokio::spawn(async move {
                    if let Err(e) = client.run(Some(stream)).await {
                        tracing::error!(error = %e, "Binance client stopped");
                    }
                });
                tracing::info!(source = BinanceClient::NAME, "Price source started");
                return subscription;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Binance unavailable, falling back to synthetic prices");
            }
        }
    }

    let source = Arc::new(SyntheticSource::new(
        SyntheticGenerator::new(),
        settings.tick_interval,
        feed_state,
        cancel,
    ));
    let subscription = source.subscribe(Arc::new(hub.clone()));
    tokio::spawn(Arc::clone(&source).run());
    tracing::info!(source = source.name(), "Price source started");
    subscription
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        port = config.server.port,
        source = config.feed.source.as_str(),
        rate_limit = config.admission.limit,
        rate_window_secs = config.admission.window.as_secs(),
        queue_capacity = config.client.queue_capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        tick_ms = u64::try_from(config.feed.tick_interval.as_millis()).unwrap_or(u64::MAX),
        ping_secs = config.client.ping_interval.as_secs(),
        idle_secs = config.client.idle_timeout.as_secs(),
        trust_forwarded_for = config.admission.trust_forwarded_for,
        "Connection settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
