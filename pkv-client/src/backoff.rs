//! Exponential reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Delay generator for consecutive reconnect attempts.
///
/// Delays double from `floor` up to `cap`; `jitter` shaves a random fraction
/// off each delay so many clients do not reconnect in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Starts at the floor.
    pub fn new(config: BackoffConfig) -> Self {
        Backoff { config, attempt: 0 }
    }

    /// Back to the floor; called on every successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Upper bound of the next delay, before jitter.
    pub fn peek(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        self.config.floor.saturating_mul(factor).min(self.config.cap)
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.peek();
        self.attempt = self.attempt.saturating_add(1);
        if self.config.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let shave = rand::thread_rng().gen_range(0.0..=self.config.jitter.min(1.0));
        base.mul_f64(1.0 - shave)
    }
}
