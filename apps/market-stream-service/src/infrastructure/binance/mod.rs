//! Binance Live Feed
//!
//! Price source backed by the Binance public trade stream.

pub mod book;
pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;

pub use book::PriceBook;
pub use client::{BinanceClient, BinanceClientConfig, BinanceClientError, TradeStream};
pub use codec::TradeCodec;
pub use messages::TradeEvent;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
