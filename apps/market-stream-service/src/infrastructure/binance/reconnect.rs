//! Reconnection Policy
//!
//! Exponential backoff with jitter between upstream connection attempts.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::FeedSettings;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the delay.
    pub max_delay: Duration,
    /// Growth factor applied after each attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl From<&FeedSettings> for ReconnectConfig {
    fn from(settings: &FeedSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            max_attempts: settings.max_reconnect_attempts,
            ..Self::default()
        }
    }
}

/// Stateful backoff schedule, reset after every successful connection.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy at its initial delay.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.jittered(self.current_delay);
        let grown = if self.config.multiplier.is_finite() && self.config.multiplier > 0.0 {
            self.current_delay.mul_f64(self.config.multiplier)
        } else {
            self.current_delay
        };
        self.current_delay = grown.min(self.config.max_delay);

        Some(delay)
    }

    /// Return to the initial delay after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng()
            .random_range(-self.config.jitter_factor..=self.config.jitter_factor);
        delay.mul_f64((1.0 + factor).max(0.0))
    }
}
