//! Binance Stream Messages
//!
//! Wire types for the public trade stream.
//!
//! # Trade Event
//!
//! ```json
//! {"e":"trade","E":1672515782136,"s":"BTCUSDT","t":12345,"p":"95000.10","q":"0.015","T":1672515782134,"m":true}
//! ```
//!
//! Combined streams wrap each event as `{"stream":"btcusdt@trade","data":{...}}`.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Single trade execution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TradeEvent {
    /// Event type, `"trade"`.
    #[serde(rename = "e")]
    pub event_type: String,
    /// Event time (ms since epoch).
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Trading pair, uppercase (e.g. `BTCUSDT`).
    #[serde(rename = "s")]
    pub symbol: String,
    /// Trade ID.
    #[serde(rename = "t")]
    pub trade_id: u64,
    /// Trade price.
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    /// Trade quantity.
    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    /// Trade time (ms since epoch).
    #[serde(rename = "T", default)]
    pub trade_time: Option<i64>,
}

/// Combined-stream envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope<T> {
    /// Stream name, e.g. `btcusdt@trade`.
    pub stream: String,
    /// Wrapped payload.
    pub data: T,
}

/// Uppercase display symbol for a trading pair (`btcusdt` -> `BTC`).
#[must_use]
pub fn display_symbol(pair: &str) -> String {
    let upper = pair.to_uppercase();
    match upper.strip_suffix("USDT") {
        Some(base) if !base.is_empty() => base.to_string(),
        _ => upper,
    }
}

/// Stream path for a list of pairs: `btcusdt@trade/ethusdt@trade`.
#[must_use]
pub fn trade_streams(pairs: &[String]) -> String {
    pairs
        .iter()
        .map(|p| format!("{}@trade", p.to_lowercase()))
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("btcusdt", "BTC")]
    #[test_case("AVAXUSDT", "AVAX")]
    #[test_case("usdt", "USDT" ; "bare quote asset")]
    #[test_case("ethbtc", "ETHBTC" ; "non usdt pair")]
    fn display_symbols(pair: &str, expected: &str) {
        assert_eq!(display_symbol(pair), expected);
    }

    #[test]
    fn stream_path_joins_pairs() {
        let pairs = vec!["btcusdt".to_string(), "ETHUSDT".to_string()];
        assert_eq!(trade_streams(&pairs), "btcusdt@trade/ethusdt@trade");
    }
}
