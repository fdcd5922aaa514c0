//! HTTP Middleware
//!
//! Admission control for the WebSocket route and the response headers
//! applied to every route.

use std::net::{IpAddr, SocketAddr};

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::AppState;
use crate::domain::admission::Admission;
use crate::infrastructure::metrics::{self, AdmissionOutcome};

/// Body of a rejected upgrade.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitedResponse {
    /// Error description.
    pub error: &'static str,
    /// Seconds until the next attempt can succeed.
    pub retry_after_secs: u64,
}

/// Gate a request on the per-IP sliding window.
///
/// Denied requests get a 429 before the handler runs, so no client is
/// created and the hub never hears about them.
pub async fn admission(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), peer, state.trust_forwarded_for);

    match state.limiter.check(&ip) {
        Admission::Allowed => {
            metrics::record_admission(AdmissionOutcome::Allowed);
            next.run(request).await
        }
        Admission::Denied { retry_after } => {
            metrics::record_admission(AdmissionOutcome::Denied);
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            let secs = secs.max(1);
            tracing::warn!(ip = %ip, retry_after_secs = secs, "Connection rate limited");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                Json(RateLimitedResponse {
                    error: "rate limit exceeded",
                    retry_after_secs: secs,
                }),
            )
                .into_response()
        }
    }
}

/// Resolve the address a request is attributed to.
///
/// Proxy headers are only honoured when `trust_forwarded` is set; the
/// left-most `X-Forwarded-For` entry wins over `X-Real-IP`.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_forwarded: bool) -> IpAddr {
    if !trust_forwarded {
        return peer.ip();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        })
        .unwrap_or_else(|| peer.ip())
}

const SECURITY_HEADERS: [(&str, &str); 4] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains",
    ),
];

/// Add the standard security headers to every response.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    response
}
