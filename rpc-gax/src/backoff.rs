//! Backoff schedule.
//!
//! Retry delays and attempt timeouts grow geometrically and are capped:
//!
//! ```text
//! retry_delay(n)     = min(initial_retry_delay * retry_delay_multiplier^n, max_retry_delay)
//! attempt_timeout(n) = min(initial_rpc_timeout * rpc_timeout_multiplier^n, max_rpc_timeout)
//! ```
//!
//! [`next_delay`] is the pure form. [`ExponentialBackoff`] walks the same
//! schedule one attempt at a time and applies the configured jitter.

use std::time::Duration;

use crate::config::BackoffSettings;

/// `min(initial * multiplier^attempt, max)`.
///
/// Computed in floating point seconds and rounded to whole nanoseconds;
/// saturates at `max` instead of overflowing for large attempt numbers.
pub(crate) fn grow(initial: Duration, multiplier: f64, max: Duration, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = initial.as_secs_f64() * multiplier.powi(exponent);
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }
    Duration::from_nanos((secs.max(0.0) * 1e9).round() as u64)
}

/// The retry delay and attempt timeout for `attempt` (zero-based).
///
/// Jitter is not applied here.
///
/// # Example
///
/// ```
/// use rpc_gax::{BackoffSettings, next_delay};
/// use std::time::Duration;
///
/// let backoff = BackoffSettings::new(
///     Duration::from_millis(100), 2.0, Duration::from_millis(500),
///     Duration::from_secs(1), 1.5, Duration::from_secs(2),
///     Duration::from_secs(10),
/// );
/// assert_eq!(next_delay(0, &backoff), (Duration::from_millis(100), Duration::from_secs(1)));
/// assert_eq!(next_delay(3, &backoff), (Duration::from_millis(500), Duration::from_secs(2)));
/// ```
pub fn next_delay(attempt: u32, backoff: &BackoffSettings) -> (Duration, Duration) {
    let delay = grow(
        backoff.initial_retry_delay,
        backoff.retry_delay_multiplier,
        backoff.max_retry_delay,
        attempt,
    );
    let timeout = grow(
        backoff.initial_rpc_timeout,
        backoff.rpc_timeout_multiplier,
        backoff.max_rpc_timeout,
        attempt,
    );
    (delay, timeout)
}

/// Stateful walk over the backoff schedule.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    settings: BackoffSettings,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(settings: BackoffSettings) -> Self {
        Self {
            settings,
            attempts: 0,
        }
    }

    /// Reset the backoff to its initial state.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Timeout for the attempt that is about to be made.
    pub fn attempt_timeout(&self) -> Duration {
        next_delay(self.attempts, &self.settings).1
    }

    /// The delay before the next retry, with jitter applied.
    ///
    /// Jitter only shortens a delay: with factor `j` the result lies in
    /// `[d * (1 - j), d]`.
    pub fn next_delay(&mut self) -> Duration {
        let (delay, _) = next_delay(self.attempts, &self.settings);
        self.attempts = self.attempts.saturating_add(1);
        apply_jitter(delay, self.settings.jitter)
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(ExponentialBackoff::next_delay(self))
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 - rand::random::<f64>() * jitter.min(1.0);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}
