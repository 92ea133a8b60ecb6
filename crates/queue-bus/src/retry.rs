//! # Receive backoff
//!
//! Exponential backoff for transient medium failures, e.g. a receive call that
//! fails because the connection to the medium dropped.
//!
//! Handler failures are not retried here; they go through the
//! [`RetryPipeline`](crate::pipeline::RetryPipeline) and the medium's
//! redelivery instead.

use rand::Rng;
use std::time::Duration;

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

/// Default spread applied around each delay (±25%)
pub const DEFAULT_JITTER: f64 = 0.25;

/// Exponential backoff bounded by a number of retries.
///
/// ```rust
/// use queue_bus::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), 2.0)
///     .without_jitter();
///
/// assert_eq!(policy.delay_for(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(1), Duration::from_millis(200));
/// assert_eq!(policy.delay_for(10), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the delay added or removed at random; `None` disables it
    pub jitter: Option<f64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(5), 2.0)
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            jitter: Some(DEFAULT_JITTER),
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = None;
        self
    }

    /// Spread delays by `fraction` (clamped to 0.0..=1.0)
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = Some(fraction.clamp(0.0, 1.0));
        self
    }

    /// Delay before retry number `retry` (0-based), capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let uncapped = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = uncapped.min(self.max_delay.as_secs_f64());

        let spread = match self.jitter {
            Some(fraction) if fraction > 0.0 && capped > 0.0 => {
                rand::thread_rng().gen_range((1.0 - fraction)..=(1.0 + fraction))
            }
            _ => 1.0,
        };

        Duration::from_secs_f64((capped * spread).max(0.0))
    }
}

/// Retries spent by one operation against a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    retries: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries taken so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Record a failure and return the pause before the next try, or `None`
    /// once the policy's retries are used up
    pub fn next_delay(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        if self.retries >= policy.max_attempts {
            return None;
        }

        let delay = policy.delay_for(self.retries);
        self.retries += 1;
        Some(delay)
    }
}
