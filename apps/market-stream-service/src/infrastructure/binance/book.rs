//! Price Book
//!
//! Latest trade per tracked pair, folded into publishable price records.
//!
//! - `price`: last trade price
//! - `change24h`: percent change against the first price seen this session
//! - `volume`: traded quantity accumulated this session

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use super::messages::{TradeEvent, display_symbol};
use crate::domain::price::{Price, PriceSnapshot, SnapshotError};

#[derive(Debug, Clone)]
struct Quote {
    symbol: String,
    reference: Option<Decimal>,
    last: Decimal,
    volume: Decimal,
    updated_at: DateTime<Utc>,
}

/// Why a trade was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    /// Pair is not tracked.
    UnknownPair(String),
    /// Price was zero or negative.
    NonPositivePrice,
    /// Quantity was negative.
    NegativeQuantity,
    /// Accumulated volume would exceed the decimal range.
    Overflow,
}

/// Latest price state keyed by lowercase trading pair.
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    quotes: BTreeMap<String, Quote>,
}

impl PriceBook {
    /// Track the given pairs.
    #[must_use]
    pub fn new(pairs: &[String]) -> Self {
        let quotes = pairs
            .iter()
            .map(|pair| {
                let pair = pair.to_lowercase();
                let quote = Quote {
                    symbol: display_symbol(&pair),
                    reference: None,
                    last: Decimal::ZERO,
                    volume: Decimal::ZERO,
                    updated_at: Utc::now(),
                };
                (pair, quote)
            })
            .collect();
        Self { quotes }
    }

    /// Fold a trade into the book.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the pair is untracked or the trade is invalid.
    pub fn apply(&mut self, trade: &TradeEvent) -> Result<(), Rejected> {
        let pair = trade.symbol.to_lowercase();
        let Some(quote) = self.quotes.get_mut(&pair) else {
            return Err(Rejected::UnknownPair(pair));
        };
        if trade.price <= Decimal::ZERO {
            return Err(Rejected::NonPositivePrice);
        }
        if trade.quantity.is_sign_negative() && !trade.quantity.is_zero() {
            return Err(Rejected::NegativeQuantity);
        }

        let volume = quote
            .volume
            .checked_add(trade.quantity)
            .ok_or(Rejected::Overflow)?;

        quote.reference.get_or_insert(trade.price);
        quote.last = trade.price;
        quote.volume = volume;
        quote.updated_at = trade
            .trade_time
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);
        Ok(())
    }

    /// Number of pairs that have traded at least once.
    #[must_use]
    pub fn priced(&self) -> usize {
        self.quotes.values().filter(|q| q.reference.is_some()).count()
    }

    /// Snapshot of every pair that has traded.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if two pairs map to the same display symbol.
    pub fn snapshot(&self) -> Result<PriceSnapshot, SnapshotError> {
        let prices = self
            .quotes
            .values()
            .filter_map(|quote| {
                let reference = quote.reference?;
                let change = session_change(quote.last, reference);
                Some(Price::new(
                    quote.symbol.clone(),
                    quote.last,
                    change,
                    quote.volume,
                    quote.updated_at,
                ))
            })
            .collect();
        PriceSnapshot::new(prices)
    }
}

/// Percent move from `reference` to `last`, or zero when out of range.
fn session_change(last: Decimal, reference: Decimal) -> Decimal {
    last.checked_sub(reference)
        .and_then(|delta| delta.checked_div(reference))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map_or(Decimal::ZERO, |change| change.round_dp(2))
}
