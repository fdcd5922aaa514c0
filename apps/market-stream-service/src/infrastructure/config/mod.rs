//! Configuration Module
//!
//! Environment-driven configuration for the market stream service.

mod settings;

pub use settings::{
    AdmissionSettings, ClientSettings, ConfigError, DEFAULT_BINANCE_PAIRS, FeedSettings,
    ServerSettings, ServiceConfig, SourceKind,
};
