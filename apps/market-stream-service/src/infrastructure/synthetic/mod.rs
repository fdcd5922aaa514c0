//! Synthetic Price Source
//!
//! Random-walk prices for a fixed set of crypto symbols, published on a fixed
//! interval. Used when the live feed is disabled or unreachable.
//!
//! Each tick, per symbol:
//!
//! - price drifts uniformly within ±2% of the previous price
//! - 24h change is drawn uniformly from ±10%
//! - volume is `previous price × U[0,1) × 1,000,000`
//!
//! All published values are rounded to two decimals; the walk itself keeps
//! full precision.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{PriceHandler, PriceObservers, PriceSource, PriceSubscription};
use crate::domain::price::{Price, PriceSnapshot, SnapshotError};
use crate::infrastructure::feed::{ConnectionState, FeedState};

/// Starting prices for the generated symbols.
pub const DEFAULT_BASE_PRICES: [(&str, f64); 8] = [
    ("BTC", 95_000.00),
    ("ETH", 3_500.00),
    ("SOL", 145.00),
    ("BNB", 620.00),
    ("ADA", 0.65),
    ("XRP", 0.58),
    ("DOT", 7.20),
    ("AVAX", 38.50),
];

const MAX_DRIFT: f64 = 0.04;
const MAX_CHANGE_PCT: f64 = 20.0;
const VOLUME_SCALE: f64 = 1_000_000.0;

// =============================================================================
// Generator
// =============================================================================

/// Random-walk price generator.
#[derive(Debug)]
pub struct SyntheticGenerator {
    prices: Vec<(String, f64)>,
    rng: StdRng,
}

impl SyntheticGenerator {
    /// Generator over the default symbols, seeded from the OS.
    #[must_use]
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Deterministic generator over the default symbols.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        let prices = DEFAULT_BASE_PRICES
            .iter()
            .map(|(symbol, price)| ((*symbol).to_string(), *price))
            .collect();
        Self { prices, rng }
    }

    /// Current unrounded price of every symbol.
    #[must_use]
    pub fn base_prices(&self) -> &[(String, f64)] {
        &self.prices
    }

    /// Advance the walk one step and return the published snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if a generated record fails validation.
    pub fn next_snapshot(&mut self, now: DateTime<Utc>) -> Result<PriceSnapshot, SnapshotError> {
        let mut records = Vec::with_capacity(self.prices.len());

        for (symbol, base) in &mut self.prices {
            let drift = (self.rng.random::<f64>() - 0.5) * MAX_DRIFT;
            let current = *base * (1.0 + drift);
            let change = (self.rng.random::<f64>() - 0.5) * MAX_CHANGE_PCT;
            let volume = *base * self.rng.random::<f64>() * VOLUME_SCALE;

            records.push(Price::new(
                symbol.clone(),
                money(current),
                money(change),
                money(volume),
                now,
            ));
            *base = current;
        }

        PriceSnapshot::new(records)
    }
}

impl Default for SyntheticGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn money(value: f64) -> Decimal {
    Decimal::from_f64(value).map_or(Decimal::ZERO, |d| d.round_dp(2))
}

// =============================================================================
// Source
// =============================================================================

/// Price source that publishes a generated snapshot every interval.
pub struct SyntheticSource {
    generator: Mutex<SyntheticGenerator>,
    observers: PriceObservers,
    interval: Duration,
    feed: Arc<FeedState>,
    cancel: CancellationToken,
}

impl SyntheticSource {
    /// Source name used in logs and metrics.
    pub const NAME: &'static str = "synthetic";

    /// Create a new synthetic source.
    #[must_use]
    pub fn new(
        generator: SyntheticGenerator,
        interval: Duration,
        feed: Arc<FeedState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            generator: Mutex::new(generator),
            observers: PriceObservers::new(),
            interval,
            feed,
            cancel,
        }
    }

    /// Generate one snapshot and deliver it to subscribers.
    ///
    /// Returns the number of handlers notified.
    pub fn tick(&self) -> usize {
        let snapshot = self.generator.lock().next_snapshot(Utc::now());
        match snapshot {
            Ok(snapshot) => {
                self.feed.increment_snapshots();
                self.observers.publish(&snapshot)
            }
            Err(e) => {
                tracing::error!(error = %e, "Generated snapshot rejected");
                0
            }
        }
    }

    /// Publish on every interval until cancelled.
    pub async fn run(self: Arc<Self>) {
        self.feed.set_source(Self::NAME);
        self.feed.set_state(ConnectionState::Connected);
        tracing::info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "Synthetic price source started"
        );

        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let notified = self.tick();
                    tracing::trace!(notified, "Synthetic snapshot published");
                }
            }
        }

        self.feed.set_state(ConnectionState::Disconnected);
        tracing::info!("Synthetic price source stopped");
    }
}

impl PriceSource for SyntheticSource {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn subscribe(&self, handler: Arc<dyn PriceHandler>) -> PriceSubscription {
        self.observers.subscribe(handler)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn snapshot_covers_default_symbols() {
        let mut generator = SyntheticGenerator::with_seed(7);
        let snapshot = generator.next_snapshot(Utc::now()).unwrap();

        assert_eq!(snapshot.len(), DEFAULT_BASE_PRICES.len());
        for (symbol, _) in DEFAULT_BASE_PRICES {
            assert!(snapshot.get(symbol).is_some(), "missing {symbol}");
        }
    }

    #[test]
    fn same_seed_same_walk() {
        let now = Utc::now();
        let mut a = SyntheticGenerator::with_seed(42);
        let mut b = SyntheticGenerator::with_seed(42);
        for _ in 0..5 {
            assert_eq!(a.next_snapshot(now).unwrap(), b.next_snapshot(now).unwrap());
        }
    }

    #[test]
    fn values_stay_within_bounds() {
        let mut generator = SyntheticGenerator::with_seed(1);
        let two = Decimal::new(2, 2);

        for _ in 0..200 {
            let previous: Vec<f64> = generator.base_prices().iter().map(|(_, p)| *p).collect();
            let snapshot = generator.next_snapshot(Utc::now()).unwrap();

            for (price, before) in snapshot.iter().zip(previous) {
                let before = money(before);
                let low = before * (Decimal::ONE - two) - Decimal::new(2, 2);
                let high = before * (Decimal::ONE + two) + Decimal::new(2, 2);
                assert!(price.price >= low && price.price <= high, "{price:?}");
                assert!(price.change_24h.abs() <= Decimal::TEN);
                assert!(!price.volume.is_sign_negative());
                assert!(price.price.scale() <= 2);
            }
        }
    }

    #[test]
    fn tick_publishes_to_subscribers() {
        let feed = Arc::new(FeedState::new(SyntheticSource::NAME));
        let source = SyntheticSource::new(
            SyntheticGenerator::with_seed(3),
            Duration::from_secs(1),
            Arc::clone(&feed),
            CancellationToken::new(),
        );
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _subscription = source.subscribe(Arc::new(move |s: &PriceSnapshot| {
            counter.fetch_add(s.len(), Ordering::SeqCst);
        }));

        assert_eq!(source.tick(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 8);
        assert_eq!(feed.status().snapshots_published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let feed = Arc::new(FeedState::new(SyntheticSource::NAME));
        let cancel = CancellationToken::new();
        let source = Arc::new(SyntheticSource::new(
            SyntheticGenerator::with_seed(9),
            Duration::from_millis(100),
            Arc::clone(&feed),
            cancel.clone(),
        ));
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let _subscription = source.subscribe(Arc::new(move |_: &PriceSnapshot| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let task = tokio::spawn(Arc::clone(&source).run());
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(feed.is_connected());

        cancel.cancel();
        task.await.unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(feed.get_state(), ConnectionState::Disconnected);
    }
}
