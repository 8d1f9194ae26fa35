//! Retry delays.
//!
//! [`ExponentialBackoff`] paces a single retrying task, e.g. a watch that keeps
//! failing. The [`RateLimiter`] implementations compute per item delays for
//! work queues.

mod rate_limiter;

use std::time::Duration;

pub use rate_limiter::{
    ItemExponential, MaxOf, RateLimiter, TokenBucket, default_controller_rate_limiter,
};

/// Doubles the delay after every attempt, up to a cap.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    /// The first delay is `initial`, no delay is longer than `max`.
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = self.current.saturating_mul(2);

        delay
    }

    /// Start over from the initial delay, call it after a success.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
