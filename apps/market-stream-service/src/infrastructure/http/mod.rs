//! HTTP Server
//!
//! Serves the WebSocket price stream plus health and metrics endpoints.
//!
//! # Endpoints
//!
//! - `GET /ws` - WebSocket price stream, admission-controlled per source IP
//! - `GET /health` - JSON status with the live connection count
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (price feed connected)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /api/prices` - Pointer to the WebSocket endpoint

pub mod middleware;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domain::admission::RateLimiter;
use crate::infrastructure::client::{Client, ClientConfig};
use crate::infrastructure::feed::FeedState;
use crate::infrastructure::hub::Hub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// State
// =============================================================================

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection hub.
    pub hub: Hub,
    /// Per-IP upgrade limiter.
    pub limiter: Arc<RateLimiter<IpAddr>>,
    /// Upstream feed status.
    pub feed: Arc<FeedState>,
    /// Per-connection parameters.
    pub client: ClientConfig,
    /// Service name reported by `/health`.
    pub service_name: Arc<str>,
    /// Honour `X-Forwarded-For` / `X-Real-IP`.
    pub trust_forwarded_for: bool,
}

// =============================================================================
// Response Types
// =============================================================================

/// `/health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Service name.
    pub service: String,
    /// Registered WebSocket clients.
    pub connections: usize,
}

/// `/api/prices` response body.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    /// Human-readable message.
    pub message: &'static str,
}

// =============================================================================
// Router
// =============================================================================

/// Build the router with every route and layer attached.
pub fn create_router(state: AppState) -> Router {
    let ws = get(ws_handler).layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::admission,
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/ws", ws)
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/prices", get(prices_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::security_headers))
                .layer(cors),
        )
}

// =============================================================================
// Handlers
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let config = state.client;
    let hub = state.hub;

    ws.max_message_size(config.max_message_size)
        .on_failed_upgrade(move |e| {
            tracing::warn!(peer = %peer, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let (client, handle) = Client::with_peer(config, peer);
            tracing::info!(client_id = %client.id(), peer = %peer, "WebSocket client connected");
            hub.register(handle);
            client.run(socket, hub).await;
        })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: state.service_name.to_string(),
        connections: state.hub.client_count().await,
    })
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.feed.status();
    let code = if state.feed.is_connected() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn prices_handler() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Use WebSocket at /ws for real-time prices",
    })
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server bound to a listener.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::BindFailed` if the address is unavailable.
    pub async fn bind(
        addr: SocketAddr,
        state: AppState,
        cancel: CancellationToken,
    ) -> Result<Self, HttpServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(addr, e.to_string()))?;

        Ok(Self {
            listener,
            router: create_router(state),
            cancel,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` if the socket cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, HttpServerError> {
        self.listener
            .local_addr()
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` on a fatal accept error.
    pub async fn serve(self) -> Result<(), HttpServerError> {
        let addr = self.local_addr()?;
        tracing::info!(addr = %addr, "HTTP server listening");

        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.cancel.cancelled_owned())
        .await
        .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind the listener.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Limiter Janitor
// =============================================================================

/// Periodically drop limiter keys with no requests inside the window.
///
/// Each sweep is evaluated at the tick's scheduled instant.
pub fn spawn_limiter_janitor(
    limiter: Arc<RateLimiter<IpAddr>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                tick = ticker.tick() => {
                    let pruned = limiter.prune_idle_at(tick.into_std());
                    if pruned > 0 {
                        tracing::debug!(pruned, remaining = limiter.tracked_keys(), "Pruned idle limiter keys");
                    }
                }
            }
        }
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::admission::RateLimitConfig;
    use crate::infrastructure::feed::ConnectionState;

    fn state(limit: usize) -> (AppState, CancellationToken) {
        let cancel = CancellationToken::new();
        let (hub, _task) = Hub::spawn(cancel.clone());
        let state = AppState {
            hub,
            limiter: Arc::new(RateLimiter::new(RateLimitConfig::new(
                limit,
                Duration::from_secs(60),
            ))),
            feed: Arc::new(FeedState::new("synthetic")),
            client: ClientConfig::default(),
            service_name: Arc::from("market-stream-service"),
            trust_forwarded_for: false,
        };
        (state, cancel)
    }

    fn app(state: AppState) -> Router {
        create_router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5555))))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_service_and_connections() {
        let (state, _cancel) = state(10);
        let response = app(state).oneshot(get_request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "market-stream-service");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn prices_points_to_websocket() {
        let (state, _cancel) = state(10);
        let response = app(state).oneshot(get_request("/api/prices")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Use WebSocket at /ws for real-time prices");
    }

    #[tokio::test]
    async fn readiness_follows_feed_state() {
        let (state, _cancel) = state(10);
        let feed = Arc::clone(&state.feed);
        let router = app(state);

        let response = router.clone().oneshot(get_request("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        feed.set_state(ConnectionState::Connected);
        let response = router.oneshot(get_request("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["state"], "connected");
        assert_eq!(body["source"], "synthetic");
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let (state, _cancel) = state(10);
        let response = app(state).oneshot(get_request("/healthz")).await.unwrap();

        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["x-xss-protection"], "1; mode=block");
        assert_eq!(
            headers["strict-transport-security"],
            "max-age=31536000; includeSubDomains"
        );
    }

    #[tokio::test]
    async fn cors_preflight_allows_any_origin() {
        let (state, _cancel) = state(10);
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/health")
            .header("origin", "https://example.com")
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();
        let response = app(state).oneshot(request).await.unwrap();

        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn websocket_route_is_rate_limited() {
        let (state, _cancel) = state(2);
        let limiter = Arc::clone(&state.limiter);
        let router = app(state);

        for _ in 0..2 {
            let response = router.clone().oneshot(get_request("/ws")).await.unwrap();
            assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }

        let response = router.clone().oneshot(get_request("/ws")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));
        let body = body_json(response).await;
        assert_eq!(body["error"], "rate limit exceeded");

        // Other routes are not gated.
        let response = router.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_prunes_idle_keys() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(
            5,
            Duration::from_millis(100),
        )));
        let ip = IpAddr::from([127, 0, 0, 1]);
        let admitted_at = tokio::time::Instant::now().into_std();
        assert!(limiter.check_at(&ip, admitted_at).is_allowed());

        let cancel = CancellationToken::new();
        let task = spawn_limiter_janitor(Arc::clone(&limiter), Duration::from_millis(50), cancel.clone());

        // The 50ms sweep still sees the admission inside the window.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(limiter.tracked_keys(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.tracked_keys(), 0);

        cancel.cancel();
        task.await.unwrap();
    }
}
