//! Per-key exponential backoff with jitter.
//!
//! Backoff is explicit state (attempt counter and next-allowed time) rather
//! than a sleeping task, so callers decide when to re-queue.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay_ms: u64,
    /// Upper bound for any delay, jitter included.
    pub max_delay_ms: u64,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Relative jitter: delays are scaled by a factor in `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 300_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay_ms == 0 {
            return Err("backoff.initial_delay_ms must be positive".into());
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("backoff.max_delay_ms must not be below initial_delay_ms".into());
        }
        if self.multiplier < 1.0 {
            return Err("backoff.multiplier must be at least 1.0".into());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("backoff.jitter must be within [0, 1]".into());
        }
        Ok(())
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Backoff state of a single key.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
    next_allowed: Option<Instant>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
            next_allowed: None,
        }
    }

    /// Consecutive failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;

        let exponent = self.attempts.saturating_sub(1).min(64) as i32;
        let base = (self.config.initial_delay().as_secs_f64() * self.config.multiplier.powi(exponent))
            .min(self.config.max_delay().as_secs_f64());

        let factor = if self.config.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.config.jitter)..=(1.0 + self.config.jitter))
        } else {
            1.0
        };
        let delay = Duration::from_secs_f64(base * factor).min(self.config.max_delay());

        self.next_allowed = Some(Instant::now() + delay);
        delay
    }

    /// True if an attempt may run at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.next_allowed.map_or(true, |t| now >= t)
    }

    /// Time left until the next attempt is allowed.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_allowed
            .map_or(Duration::ZERO, |t| t.saturating_duration_since(now))
    }

    /// Back to the base interval after any successful reconciliation.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_allowed = None;
    }
}
