//! Backoff delay calculation for retry policies

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay between attempts grows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay between every attempt
    Fixed,

    /// delay = initial_delay * attempt
    Linear,

    /// delay = initial_delay * base^(attempt-1)
    Exponential { base: f64 },
}

/// Computes the delay before the next attempt, capped at a maximum and
/// optionally jittered by ±20% to spread synchronized retries
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    strategy: BackoffStrategy,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffCalculator {
    pub fn new(
        strategy: BackoffStrategy,
        initial_delay: Duration,
        max_delay: Duration,
        jitter: bool,
    ) -> Self {
        Self {
            strategy,
            initial_delay,
            max_delay,
            jitter,
        }
    }

    /// Delay to sleep after the given failed attempt (1-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = match &self.strategy {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay * attempt,
            BackoffStrategy::Exponential { base } => {
                let multiplier = base.powi(attempt.saturating_sub(1) as i32);
                Duration::from_nanos((self.initial_delay.as_nanos() as f64 * multiplier) as u64)
            }
        };

        let capped = base.min(self.max_delay);
        if self.jitter {
            let factor = rand::rng().random_range(0.8..1.2);
            Duration::from_nanos((capped.as_nanos() as f64 * factor) as u64)
        } else {
            capped
        }
    }
}
