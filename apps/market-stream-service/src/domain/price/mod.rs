//! Price Model
//!
//! Immutable price records and the snapshot collection that is fanned out to
//! subscribers on every tick.
//!
//! # Wire Shape
//!
//! A snapshot serializes as an object holding the records under `prices`:
//!
//! ```json
//! {"prices":[{"symbol":"BTC","price":95000.12,"change24h":-1.25,"volume":482113.40,"timestamp":"2026-01-01T00:00:00Z"}]}
//! ```
//!
//! Decimals are written as JSON numbers with their full digits, so browsers
//! read plain numbers and Rust readers get the exact value back.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, de};

// =============================================================================
// Price
// =============================================================================

/// Latest observed price for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Ticker symbol (e.g. `BTC`).
    pub symbol: String,
    /// Last price.
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub price: Decimal,
    /// Signed 24 hour change in percent.
    #[serde(rename = "change24h", with = "rust_decimal::serde::arbitrary_precision")]
    pub change_24h: Decimal,
    /// Traded volume.
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub volume: Decimal,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
}

impl Price {
    /// Create a new price record.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        price: Decimal,
        change_24h: Decimal,
        volume: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change_24h,
            volume,
            timestamp,
        }
    }

    fn validate(&self) -> Result<(), SnapshotError> {
        if self.symbol.trim().is_empty() {
            return Err(SnapshotError::EmptySymbol);
        }
        if self.price.is_sign_negative() && !self.price.is_zero() {
            return Err(SnapshotError::NegativePrice(self.symbol.clone()));
        }
        if self.volume.is_sign_negative() && !self.volume.is_zero() {
            return Err(SnapshotError::NegativeVolume(self.symbol.clone()));
        }
        Ok(())
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Collection of prices published together.
///
/// Symbols are unique within a snapshot. Order is preserved for display but
/// carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriceSnapshot {
    prices: Vec<Price>,
}

impl PriceSnapshot {
    /// Build a validated snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if a symbol repeats, is blank, or a price or
    /// volume is negative.
    pub fn new(prices: Vec<Price>) -> Result<Self, SnapshotError> {
        let mut seen = HashSet::with_capacity(prices.len());
        for price in &prices {
            price.validate()?;
            if !seen.insert(price.symbol.as_str()) {
                return Err(SnapshotError::DuplicateSymbol(price.symbol.clone()));
            }
        }
        Ok(Self { prices })
    }

    /// Snapshot with no prices.
    #[must_use]
    pub const fn empty() -> Self {
        Self { prices: Vec::new() }
    }

    /// Number of prices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the snapshot carries no prices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Look up the price for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Price> {
        self.prices.iter().find(|p| p.symbol == symbol)
    }

    /// Iterate over the prices.
    pub fn iter(&self) -> std::slice::Iter<'_, Price> {
        self.prices.iter()
    }

    /// Borrow the prices as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Price] {
        &self.prices
    }
}

impl TryFrom<Vec<Price>> for PriceSnapshot {
    type Error = SnapshotError;

    fn try_from(prices: Vec<Price>) -> Result<Self, Self::Error> {
        Self::new(prices)
    }
}

impl From<PriceSnapshot> for Vec<Price> {
    fn from(snapshot: PriceSnapshot) -> Self {
        snapshot.prices
    }
}

impl<'de> Deserialize<'de> for PriceSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Message {
            prices: Vec<Price>,
        }

        let message = Message::deserialize(deserializer)?;
        Self::new(message.prices).map_err(de::Error::custom)
    }
}

impl<'a> IntoIterator for &'a PriceSnapshot {
    type Item = &'a Price;
    type IntoIter = std::slice::Iter<'a, Price>;

    fn into_iter(self) -> Self::IntoIter {
        self.prices.iter()
    }
}

/// Snapshot validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// Same symbol appears twice.
    #[error("duplicate symbol in snapshot: {0}")]
    DuplicateSymbol(String),

    /// Symbol is blank.
    #[error("symbol cannot be empty")]
    EmptySymbol,

    /// Price below zero.
    #[error("negative price for {0}")]
    NegativePrice(String),

    /// Volume below zero.
    #[error("negative volume for {0}")]
    NegativeVolume(String),
}

// =============================================================================
// Tests
// =============================================================================
