//! Service Configuration Settings
//!
//! Configuration types for the market stream service, loaded from
//! environment variables. Unparseable values fall back to defaults;
//! values that parse but make no sense are rejected by [`ServiceConfig::validate`].

use std::time::Duration;

/// Upstream price source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Locally generated random-walk prices.
    #[default]
    Synthetic,
    /// Binance live trade stream.
    Binance,
}

impl SourceKind {
    /// Parse from the `USE_REAL_API` flag.
    #[must_use]
    pub fn from_use_real_api(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("true") {
            Self::Binance
        } else {
            Self::Synthetic
        }
    }

    /// Source name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Synthetic => "synthetic",
            Self::Binance => "binance",
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Listening port for HTTP and WebSocket traffic.
    pub port: u16,
    /// Service name reported by `/health`.
    pub service_name: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 3002,
            service_name: "market-stream-service".to_string(),
        }
    }
}

/// Upgrade admission settings.
#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    /// Upgrades allowed per source IP per window.
    pub limit: usize,
    /// Sliding window length.
    pub window: Duration,
    /// How often idle limiter keys are dropped.
    pub cleanup_interval: Duration,
    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_forwarded_for: bool,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
            trust_forwarded_for: false,
        }
    }
}

/// Per-subscriber connection settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Outbound queue capacity in frames.
    pub queue_capacity: usize,
    /// Keepalive ping interval.
    pub ping_interval: Duration,
    /// Disconnect after this long without any inbound frame.
    pub idle_timeout: Duration,
    /// Maximum time for a single frame write.
    pub write_timeout: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_bytes: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            ping_interval: Duration::from_secs(54),
            idle_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            max_message_bytes: 512,
        }
    }
}

/// Price source settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Which source to run.
    pub source: SourceKind,
    /// Snapshot publication interval.
    pub tick_interval: Duration,
    /// Binance stream base URL.
    pub binance_url: String,
    /// Binance trading pairs (lowercase).
    pub binance_pairs: Vec<String>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

/// Default Binance trading pairs.
pub const DEFAULT_BINANCE_PAIRS: [&str; 8] = [
    "btcusdt", "ethusdt", "solusdt", "bnbusdt", "adausdt", "xrpusdt", "dotusdt", "avaxusdt",
];

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            tick_interval: Duration::from_secs(1),
            binance_url: "wss://stream.binance.com:9443/ws".to_string(),
            binance_pairs: DEFAULT_BINANCE_PAIRS.iter().map(|p| (*p).to_string()).collect(),
            reconnect_delay_initial: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Upgrade admission settings.
    pub admission: AdmissionSettings,
    /// Per-subscriber settings.
    pub client: ClientSettings,
    /// Price source settings.
    pub feed: FeedSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a setting is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            port: parse_env_u16("PORT", server_defaults.port),
            service_name: std::env::var("MARKET_STREAM_SERVICE_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(server_defaults.service_name),
        };

        let admission_defaults = AdmissionSettings::default();
        let admission = AdmissionSettings {
            limit: parse_env_usize("MARKET_STREAM_RATE_LIMIT", admission_defaults.limit),
            window: parse_env_duration_secs(
                "MARKET_STREAM_RATE_WINDOW_SECS",
                admission_defaults.window,
            ),
            cleanup_interval: parse_env_duration_secs(
                "MARKET_STREAM_RATE_CLEANUP_SECS",
                admission_defaults.cleanup_interval,
            ),
            trust_forwarded_for: parse_env_bool(
                "MARKET_STREAM_TRUST_FORWARDED_FOR",
                admission_defaults.trust_forwarded_for,
            ),
        };

        let client_defaults = ClientSettings::default();
        let client = ClientSettings {
            queue_capacity: parse_env_usize(
                "MARKET_STREAM_CLIENT_QUEUE_CAPACITY",
                client_defaults.queue_capacity,
            ),
            ping_interval: parse_env_duration_secs(
                "MARKET_STREAM_CLIENT_PING_INTERVAL_SECS",
                client_defaults.ping_interval,
            ),
            idle_timeout: parse_env_duration_secs(
                "MARKET_STREAM_CLIENT_IDLE_TIMEOUT_SECS",
                client_defaults.idle_timeout,
            ),
            write_timeout: parse_env_duration_secs(
                "MARKET_STREAM_CLIENT_WRITE_TIMEOUT_SECS",
                client_defaults.write_timeout,
            ),
            max_message_bytes: parse_env_usize(
                "MARKET_STREAM_CLIENT_MAX_MESSAGE_BYTES",
                client_defaults.max_message_bytes,
            ),
        };

        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            source: std::env::var("USE_REAL_API")
                .map(|v| SourceKind::from_use_real_api(&v))
                .unwrap_or_default(),
            tick_interval: parse_env_duration_millis(
                "MARKET_STREAM_TICK_INTERVAL_MS",
                feed_defaults.tick_interval,
            ),
            binance_url: std::env::var("BINANCE_WS_URL").unwrap_or(feed_defaults.binance_url),
            binance_pairs: std::env::var("BINANCE_PAIRS")
                .map(|v| parse_pairs(&v))
                .unwrap_or(feed_defaults.binance_pairs),
            reconnect_delay_initial: parse_env_duration_millis(
                "BINANCE_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "BINANCE_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "BINANCE_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "BINANCE_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
        };

        let config = Self {
            server,
            admission,
            client,
            feed,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admission.limit == 0 {
            return Err(invalid("MARKET_STREAM_RATE_LIMIT", "must be at least 1"));
        }
        if self.admission.window.is_zero() {
            return Err(invalid("MARKET_STREAM_RATE_WINDOW_SECS", "must be positive"));
        }
        if self.admission.cleanup_interval.is_zero() {
            return Err(invalid("MARKET_STREAM_RATE_CLEANUP_SECS", "must be positive"));
        }
        if self.client.queue_capacity == 0 {
            return Err(invalid(
                "MARKET_STREAM_CLIENT_QUEUE_CAPACITY",
                "must be at least 1",
            ));
        }
        if self.client.ping_interval.is_zero()
            || self.client.ping_interval >= self.client.idle_timeout
        {
            return Err(invalid(
                "MARKET_STREAM_CLIENT_PING_INTERVAL_SECS",
                "must be positive and shorter than the idle timeout",
            ));
        }
        if self.client.write_timeout.is_zero() {
            return Err(invalid(
                "MARKET_STREAM_CLIENT_WRITE_TIMEOUT_SECS",
                "must be positive",
            ));
        }
        if self.feed.tick_interval.is_zero() {
            return Err(invalid("MARKET_STREAM_TICK_INTERVAL_MS", "must be positive"));
        }
        if self.feed.source == SourceKind::Binance && self.feed.binance_pairs.is_empty() {
            return Err(invalid("BINANCE_PAIRS", "at least one pair is required"));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_pairs(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("true", SourceKind::Binance ; "lowercase true")]
    #[test_case("TRUE", SourceKind::Binance ; "uppercase true")]
    #[test_case(" true ", SourceKind::Binance ; "padded true")]
    #[test_case("false", SourceKind::Synthetic ; "false")]
    #[test_case("1", SourceKind::Synthetic ; "numeric one")]
    #[test_case("", SourceKind::Synthetic ; "empty")]
    fn use_real_api_parsing(value: &str, expected: SourceKind) {
        assert_eq!(SourceKind::from_use_real_api(value), expected);
    }

    #[test]
    fn pairs_are_normalized() {
        assert_eq!(
            parse_pairs(" BTCUSDT, ethusdt,,"),
            vec!["btcusdt".to_string(), "ethusdt".to_string()]
        );
    }

    #[test]
    fn defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 3002);
        assert_eq!(config.server.service_name, "market-stream-service");
        assert_eq!(config.admission.limit, 100);
        assert_eq!(config.admission.window, Duration::from_secs(60));
        assert_eq!(config.client.queue_capacity, 256);
        assert_eq!(config.client.max_message_bytes, 512);
        assert_eq!(config.feed.tick_interval, Duration::from_secs(1));
        assert_eq!(config.feed.binance_pairs.len(), 8);
        assert_eq!(config.feed.reconnect_delay_initial, Duration::from_secs(5));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut config = ServiceConfig::default();
        config.client.queue_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("MARKET_STREAM_CLIENT_QUEUE_CAPACITY"));
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let mut config = ServiceConfig::default();
        config.admission.limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ping_must_be_shorter_than_idle_timeout() {
        let mut config = ServiceConfig::default();
        config.client.ping_interval = config.client.idle_timeout;
        assert!(config.validate().is_err());
    }

    #[test]
    fn binance_needs_pairs() {
        let mut config = ServiceConfig::default();
        config.feed.source = SourceKind::Binance;
        config.feed.binance_pairs.clear();
        assert!(config.validate().is_err());
    }
}
