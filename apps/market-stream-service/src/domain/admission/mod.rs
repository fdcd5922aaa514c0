//! Admission Control
//!
//! Per-key sliding-window rate limiting used to gate WebSocket upgrades.
//!
//! A key is admitted at time `t` iff fewer than `limit` admissions were
//! recorded for it in `(t - window, t]`. Denied attempts are not recorded.
//! The whole check-then-record step runs under one lock, so concurrent
//! callers on the same key can never exceed the limit.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

// =============================================================================
// Configuration
// =============================================================================

/// Rate limit parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum admissions per key within one window.
    pub limit: usize,
    /// Length of the sliding window.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Create a new configuration.
    #[must_use]
    pub const fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window }
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Attempt admitted and recorded.
    Allowed,
    /// Attempt rejected.
    Denied {
        /// Time until the oldest recorded admission leaves the window.
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the attempt was admitted.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Sliding-window rate limiter keyed by `K`.
///
/// Stores at most `limit` timestamps per key. Keys with no admissions left in
/// the window are dropped by [`RateLimiter::prune_idle`].
#[derive(Debug)]
pub struct RateLimiter<K> {
    config: RateLimitConfig,
    history: Mutex<HashMap<K, VecDeque<Instant>>>,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    /// Create a limiter with the given parameters.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter parameters.
    #[must_use]
    pub const fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Admit or reject an attempt for `key` now.
    #[must_use]
    pub fn allow(&self, key: &K) -> bool {
        self.check(key).is_allowed()
    }

    /// Admit or reject an attempt for `key` now, reporting the retry delay.
    #[must_use]
    pub fn check(&self, key: &K) -> Admission {
        self.check_at(key, Instant::now())
    }

    /// Admit or reject an attempt for `key` at an explicit instant.
    ///
    /// Callers must supply non-decreasing instants per key.
    #[must_use]
    pub fn check_at(&self, key: &K, now: Instant) -> Admission {
        let mut history = self.history.lock();

        if let Some(stamps) = history.get_mut(key) {
            evict_expired(stamps, now, self.config.window);
            if stamps.len() >= self.config.limit {
                let retry_after = stamps.front().map_or(self.config.window, |oldest| {
                    (*oldest + self.config.window).saturating_duration_since(now)
                });
                return Admission::Denied { retry_after };
            }
            stamps.push_back(now);
            return Admission::Allowed;
        }

        if self.config.limit == 0 {
            return Admission::Denied {
                retry_after: self.config.window,
            };
        }

        let mut stamps = VecDeque::with_capacity(self.config.limit.min(16));
        stamps.push_back(now);
        history.insert(key.clone(), stamps);
        Admission::Allowed
    }

    /// Drop keys whose admissions have all left the window.
    ///
    /// Returns the number of keys removed.
    pub fn prune_idle(&self) -> usize {
        self.prune_idle_at(Instant::now())
    }

    /// Drop idle keys as of `now`.
    pub fn prune_idle_at(&self, now: Instant) -> usize {
        let mut history = self.history.lock();
        let before = history.len();
        history.retain(|_, stamps| {
            evict_expired(stamps, now, self.config.window);
            !stamps.is_empty()
        });
        before - history.len()
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.history.lock().len()
    }

    /// Number of admissions stored for `key`, without pruning.
    #[must_use]
    pub fn recorded(&self, key: &K) -> usize {
        self.history.lock().get(key).map_or(0, VecDeque::len)
    }
}

fn evict_expired(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while stamps.front().is_some_and(|t| *t <= cutoff) {
        stamps.pop_front();
    }
}

// =============================================================================
// Tests
// =============================================================================
