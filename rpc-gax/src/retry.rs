//! Retry controller.
//!
//! Each invocation owns one [`RetryState`]. An attempt either succeeds,
//! fails terminally (the error is returned unchanged), or fails with a
//! retryable code, in which case the state yields the delay to wait before
//! the next attempt. The overall deadline is checked before every wait; an
//! attempt already in flight is never preempted by it.
//!
//! ```text
//! ATTEMPT --ok--> SUCCESS
//!    |
//!    +--retryable, budget left--> wait(delay) --> ATTEMPT (attempt + 1)
//!    +--retryable, no budget----> FAIL (DEADLINE_EXCEEDED)
//!    +--not retryable-----------> FAIL (error unchanged)
//! ```
//!
//! Cancellation is handled by the caller dropping the [`retry_loop`]
//! future, which aborts both the in-flight attempt and any pending wait.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::backoff::{ExponentialBackoff, next_delay};
use crate::config::RetryOptions;
use crate::GaxError;

/// What the controller tells one attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attempt {
    /// Zero-based attempt number.
    pub number: u32,
    /// Timeout for this attempt, already clamped to the remaining total
    /// budget.
    pub timeout: Option<Duration>,
}

/// Mutable state of one invocation's retry sequence.
#[derive(Debug)]
pub struct RetryState {
    retry: Option<RetryOptions>,
    backoff: Option<ExponentialBackoff>,
    timeout: Option<Duration>,
    started: Instant,
    attempt: u32,
}

impl RetryState {
    /// Start a retry sequence.
    ///
    /// `timeout` is the single-attempt timeout used when `retry` is `None`.
    pub fn new(retry: Option<RetryOptions>, timeout: Option<Duration>) -> Self {
        let backoff = retry
            .as_ref()
            .map(|r| ExponentialBackoff::new(r.backoff.clone()));
        Self {
            retry,
            backoff,
            timeout,
            started: Instant::now(),
            attempt: 0,
        }
    }

    /// Zero-based number of the attempt about to be made.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn remaining(&self) -> Option<Duration> {
        let total = self.retry.as_ref()?.backoff.total_timeout?;
        Some(total.saturating_sub(self.elapsed()))
    }

    /// Timeout for the attempt about to be made.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        let Some(retry) = &self.retry else {
            return self.timeout;
        };
        let (_, scheduled) = next_delay(self.attempt, &retry.backoff);
        Some(match self.remaining() {
            Some(remaining) => scheduled.min(remaining),
            None => scheduled,
        })
    }

    pub fn current(&self) -> Attempt {
        Attempt {
            number: self.attempt,
            timeout: self.attempt_timeout(),
        }
    }

    /// Decide what follows a failed attempt.
    ///
    /// Returns the delay before the next attempt, or the error that ends the
    /// sequence: the original error when it is not retryable, or a
    /// deadline-exceeded error when the retry budget is spent.
    pub fn on_failure(&mut self, err: GaxError) -> Result<Duration, GaxError> {
        let (Some(retry), Some(backoff)) = (&self.retry, self.backoff.as_mut()) else {
            return Err(err);
        };
        if !err.is_retryable_in(&retry.retry_codes) {
            return Err(err);
        }

        if let Some(max_retries) = retry.backoff.max_retries {
            if self.attempt >= max_retries {
                return Err(GaxError::deadline_exceeded(format!(
                    "exceeded maximum number of retries ({}) before any response was received; last error: {}",
                    max_retries, err
                )));
            }
        }

        let delay = backoff.next_delay();
        if let Some(total) = retry.backoff.total_timeout {
            if self.started.elapsed() + delay >= total {
                return Err(GaxError::deadline_exceeded(format!(
                    "total timeout of {}ms exceeded before any response was received; last error: {}",
                    total.as_millis(),
                    err
                )));
            }
        }

        self.attempt += 1;
        #[cfg(feature = "tracing")]
        tracing::debug!(
            error = %err,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying after transient error"
        );
        Ok(delay)
    }
}

/// Run `attempt` until it succeeds or the retry policy gives up.
///
/// Without a retry policy exactly one attempt is made and its failure is
/// final. Attempts are strictly sequential.
///
/// # Example
///
/// ```ignore
/// let response = retry_loop(settings.retry.clone(), settings.timeout, |attempt| {
///     raw.call(request.clone(), ctx.with_timeout(attempt.timeout))
/// })
/// .await?;
/// ```
pub async fn retry_loop<T, F, Fut>(
    retry: Option<RetryOptions>,
    timeout: Option<Duration>,
    mut attempt: F,
) -> Result<T, GaxError>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, GaxError>>,
{
    let mut state = RetryState::new(retry, timeout);
    loop {
        match attempt(state.current()).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                let delay = state.on_failure(err)?;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffSettings, RetryCodes};
    use rpc_gax_core::Code;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn backoff() -> BackoffSettings {
        BackoffSettings::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(1),
            Duration::from_millis(500),
            1.0,
            Duration::from_millis(500),
            Duration::from_secs(2),
        )
    }

    fn retry(backoff: BackoffSettings) -> Option<RetryOptions> {
        Some(RetryOptions::new(RetryCodes::idempotent(), backoff))
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_policy_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_loop(None, Some(Duration::from_secs(1)), |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(attempt.timeout, Some(Duration::from_secs(1)));
            async { Err(GaxError::unavailable("down")) }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Code::Unavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_loop(retry(backoff()), None, |attempt| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(attempt.number, n);
            async move {
                if n == 0 {
                    Err(GaxError::unavailable("try again"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_unchanged() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_loop(retry(backoff()), None, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(GaxError::not_found("gone")) }
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), Some("gone"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encode_error_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let codes = RetryCodes::new([Code::Internal]);
        let result: Result<(), _> =
            retry_loop(Some(RetryOptions::new(codes, backoff())), None, |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(GaxError::Encode("no rule matched".into())) }
            })
            .await;
        assert!(matches!(result, Err(GaxError::Encode(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_timeout_exhausted() {
        let start = Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_loop(retry(backoff()), None, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(GaxError::unavailable("down")) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert!(err.message().unwrap().contains("UNAVAILABLE: down"));
        // delays 100 + 200 + 400 + 800 = 1500ms; the next (1000ms) would cross 2s
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retries_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_loop(retry(backoff().max_retries(2)), None, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(GaxError::unavailable("down")) }
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert!(err.message().unwrap().contains("maximum number of retries"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_clamped_to_remaining() {
        let mut settings = backoff();
        settings.initial_rpc_timeout = Duration::from_secs(5);
        settings.max_rpc_timeout = Duration::from_secs(5);
        let state = RetryState::new(retry(settings), None);
        assert_eq!(state.attempt_timeout(), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(state.attempt_timeout(), Some(Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_follows_schedule() {
        let mut settings = backoff();
        settings.rpc_timeout_multiplier = 2.0;
        settings.initial_rpc_timeout = Duration::from_millis(100);
        settings.max_rpc_timeout = Duration::from_millis(300);
        let mut state = RetryState::new(retry(settings), None);

        assert_eq!(state.current().timeout, Some(Duration::from_millis(100)));
        state.on_failure(GaxError::unavailable("x")).unwrap();
        assert_eq!(state.current().number, 1);
        assert_eq!(state.current().timeout, Some(Duration::from_millis(200)));
        state.on_failure(GaxError::unavailable("x")).unwrap();
        assert_eq!(state.current().timeout, Some(Duration::from_millis(300)));
    }
}
