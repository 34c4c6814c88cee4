//! Per-method call settings.
//!
//! [`CallSettings`] is built once per client method and shared by every
//! invocation. Per-call [`CallOptions`] are merged over it with
//! [`CallSettings::merge`], which returns a new value and never touches the
//! shared default.

use std::collections::BTreeSet;
use std::time::Duration;

use http::HeaderMap;
use rpc_gax_core::Code;

use super::auth::layer_headers;
use super::options::CallOptions;
use crate::GaxError;

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Default delay before the first retry.
    pub const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);

    /// Default multiplier applied to the retry delay after each attempt.
    pub const RETRY_DELAY_MULTIPLIER: f64 = 1.3;

    /// Default ceiling on the retry delay.
    pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

    /// Default timeout of the first attempt.
    pub const INITIAL_RPC_TIMEOUT: Duration = Duration::from_secs(20);

    /// Default multiplier applied to the attempt timeout after each attempt.
    pub const RPC_TIMEOUT_MULTIPLIER: f64 = 1.0;

    /// Default ceiling on the attempt timeout.
    pub const MAX_RPC_TIMEOUT: Duration = Duration::from_secs(20);

    /// Default overall deadline across all attempts.
    pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(600);

    /// Default delay before a bundle is flushed when no other threshold trips.
    pub const BUNDLE_DELAY_THRESHOLD: Duration = Duration::from_millis(10);
}

/// The set of status codes a method may retry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryCodes(BTreeSet<Code>);

impl RetryCodes {
    pub fn new<I: IntoIterator<Item = Code>>(codes: I) -> Self {
        Self(codes.into_iter().collect())
    }

    /// No code is retryable.
    pub fn none() -> Self {
        Self::default()
    }

    /// The conventional set for idempotent methods.
    pub fn idempotent() -> Self {
        Self::new([Code::DeadlineExceeded, Code::Unavailable])
    }

    pub fn contains(&self, code: Code) -> bool {
        self.0.contains(&code)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Code> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Code> for RetryCodes {
    fn from_iter<I: IntoIterator<Item = Code>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Backoff parameters for retries.
///
/// Retry delays grow from `initial_retry_delay` by `retry_delay_multiplier`
/// up to `max_retry_delay`; attempt timeouts grow from `initial_rpc_timeout`
/// by `rpc_timeout_multiplier` up to `max_rpc_timeout`. Retrying stops when
/// either `total_timeout` would be exceeded or `max_retries` retries have been
/// made; exactly one of the two must be set.
///
/// # Example
///
/// ```
/// use rpc_gax::BackoffSettings;
/// use std::time::Duration;
///
/// let backoff = BackoffSettings::new(
///     Duration::from_millis(100), 1.3, Duration::from_secs(60),
///     Duration::from_secs(20), 1.0, Duration::from_secs(20),
///     Duration::from_secs(600),
/// );
/// assert!(backoff.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffSettings {
    pub initial_retry_delay: Duration,
    pub retry_delay_multiplier: f64,
    pub max_retry_delay: Duration,
    pub initial_rpc_timeout: Duration,
    pub rpc_timeout_multiplier: f64,
    pub max_rpc_timeout: Duration,
    /// Overall deadline across all attempts.
    pub total_timeout: Option<Duration>,
    /// Maximum number of retries (not counting the initial attempt).
    pub max_retries: Option<u32>,
    /// Jitter factor in `[0, 1]`. A delay `d` becomes a value in
    /// `[d * (1 - jitter), d]`, so jittered delays never exceed the
    /// unjittered schedule.
    pub jitter: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_retry_delay: defaults::INITIAL_RETRY_DELAY,
            retry_delay_multiplier: defaults::RETRY_DELAY_MULTIPLIER,
            max_retry_delay: defaults::MAX_RETRY_DELAY,
            initial_rpc_timeout: defaults::INITIAL_RPC_TIMEOUT,
            rpc_timeout_multiplier: defaults::RPC_TIMEOUT_MULTIPLIER,
            max_rpc_timeout: defaults::MAX_RPC_TIMEOUT,
            total_timeout: Some(defaults::TOTAL_TIMEOUT),
            max_retries: None,
            jitter: 0.0,
        }
    }
}

impl BackoffSettings {
    /// Backoff bounded by a total timeout.
    pub fn new(
        initial_retry_delay: Duration,
        retry_delay_multiplier: f64,
        max_retry_delay: Duration,
        initial_rpc_timeout: Duration,
        rpc_timeout_multiplier: f64,
        max_rpc_timeout: Duration,
        total_timeout: Duration,
    ) -> Self {
        Self {
            initial_retry_delay,
            retry_delay_multiplier,
            max_retry_delay,
            initial_rpc_timeout,
            rpc_timeout_multiplier,
            max_rpc_timeout,
            total_timeout: Some(total_timeout),
            max_retries: None,
            jitter: 0.0,
        }
    }

    /// Backoff bounded by a retry count instead of a total timeout.
    pub fn with_max_retries(
        max_retries: u32,
        initial_retry_delay: Duration,
        retry_delay_multiplier: f64,
        max_retry_delay: Duration,
        initial_rpc_timeout: Duration,
        rpc_timeout_multiplier: f64,
        max_rpc_timeout: Duration,
    ) -> Self {
        Self {
            initial_retry_delay,
            retry_delay_multiplier,
            max_retry_delay,
            initial_rpc_timeout,
            rpc_timeout_multiplier,
            max_rpc_timeout,
            total_timeout: None,
            max_retries: Some(max_retries),
            jitter: 0.0,
        }
    }

    /// Set the jitter factor.
    ///
    /// # Panics
    ///
    /// Panics if `jitter` is not between 0.0 and 1.0.
    pub fn jitter(mut self, jitter: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&jitter),
            "jitter must be between 0.0 and 1.0"
        );
        self.jitter = jitter;
        self
    }

    /// Bound retrying by a total timeout, clearing any retry count.
    pub fn total_timeout(mut self, total_timeout: Duration) -> Self {
        self.total_timeout = Some(total_timeout);
        self.max_retries = None;
        self
    }

    /// Bound retrying by a retry count, clearing any total timeout.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self.total_timeout = None;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), GaxError> {
        if self.retry_delay_multiplier < 1.0 || self.rpc_timeout_multiplier < 1.0 {
            return Err(GaxError::Config("backoff multipliers must be >= 1.0".into()));
        }
        if self.initial_retry_delay > self.max_retry_delay {
            return Err(GaxError::Config(
                "initial_retry_delay must not exceed max_retry_delay".into(),
            ));
        }
        if self.initial_rpc_timeout > self.max_rpc_timeout {
            return Err(GaxError::Config(
                "initial_rpc_timeout must not exceed max_rpc_timeout".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(GaxError::Config("jitter must be between 0.0 and 1.0".into()));
        }
        match (self.total_timeout, self.max_retries) {
            (Some(_), Some(_)) => Err(GaxError::Config(
                "total_timeout and max_retries cannot both be set".into(),
            )),
            (None, None) => Err(GaxError::Config(
                "one of total_timeout or max_retries must be set".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Which codes are retried, and how.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetryOptions {
    pub retry_codes: RetryCodes,
    pub backoff: BackoffSettings,
}

impl RetryOptions {
    pub fn new(retry_codes: RetryCodes, backoff: BackoffSettings) -> Self {
        Self {
            retry_codes,
            backoff,
        }
    }
}

/// Thresholds that trigger a bundle flush, and limits on bundle size.
///
/// A threshold of zero is disabled. A group is flushed as soon as any enabled
/// threshold is reached, or `delay_threshold` after its first request.
#[derive(Clone, Debug, PartialEq)]
pub struct BundleOptions {
    /// Flush when the group holds this many elements.
    pub element_count_threshold: usize,
    /// Flush when the group's requests total this many serialized bytes.
    pub request_byte_threshold: usize,
    /// Flush this long after the first request joins a group.
    pub delay_threshold: Duration,
    /// Hard cap on elements per bundle; a single request above it is rejected.
    pub element_count_limit: Option<usize>,
    /// Hard cap on bytes per bundle; a single request above it is rejected.
    pub request_byte_limit: Option<usize>,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            element_count_threshold: 0,
            request_byte_threshold: 0,
            delay_threshold: defaults::BUNDLE_DELAY_THRESHOLD,
            element_count_limit: None,
            request_byte_limit: None,
        }
    }
}

impl BundleOptions {
    pub fn new(
        element_count_threshold: usize,
        request_byte_threshold: usize,
        delay_threshold: Duration,
    ) -> Self {
        Self {
            element_count_threshold,
            request_byte_threshold,
            delay_threshold,
            ..Default::default()
        }
    }

    pub fn element_count_limit(mut self, limit: usize) -> Self {
        self.element_count_limit = Some(limit);
        self
    }

    pub fn request_byte_limit(mut self, limit: usize) -> Self {
        self.request_byte_limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), GaxError> {
        if let Some(limit) = self.element_count_limit {
            if self.element_count_threshold > limit {
                return Err(GaxError::Config(
                    "element_count_threshold must not exceed element_count_limit".into(),
                ));
            }
        }
        if let Some(limit) = self.request_byte_limit {
            if self.request_byte_threshold > limit {
                return Err(GaxError::Config(
                    "request_byte_threshold must not exceed request_byte_limit".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Polling schedule for long-running operations.
#[derive(Clone, Debug, PartialEq)]
pub struct PollingSettings {
    pub initial_delay: Duration,
    pub delay_multiplier: f64,
    pub max_delay: Duration,
    /// Give up polling after this long; `None` polls until done.
    pub total_timeout: Option<Duration>,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            delay_multiplier: 1.3,
            max_delay: Duration::from_secs(60),
            total_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Immutable configuration attached to one client method.
///
/// # Example
///
/// ```
/// use rpc_gax::{CallSettings, RetryOptions, RetryCodes, BackoffSettings, CallOptions};
/// use std::time::Duration;
///
/// let defaults = CallSettings::new()
///     .timeout(Duration::from_secs(30))
///     .retry(RetryOptions::new(RetryCodes::idempotent(), BackoffSettings::default()));
///
/// let merged = defaults.merge(Some(&CallOptions::new().max_retries(2)));
/// assert_eq!(merged.retry.as_ref().unwrap().backoff.max_retries, Some(2));
/// // the shared default is unchanged
/// assert_eq!(defaults.retry.as_ref().unwrap().backoff.max_retries, None);
/// ```
#[derive(Clone, Debug, Default)]
pub struct CallSettings {
    /// Timeout of a single attempt when no retry policy applies.
    pub timeout: Option<Duration>,
    pub retry: Option<RetryOptions>,
    pub bundle: Option<BundleOptions>,
    /// Whether bundling is used for methods with a bundle descriptor.
    pub bundling_enabled: bool,
    /// Whether paged methods collect every page by default.
    pub auto_paginate: bool,
    pub page_token: Option<String>,
    pub page_size: Option<u64>,
    pub max_results: Option<usize>,
    /// Headers sent with every attempt, before auth headers are added.
    pub headers: HeaderMap,
    pub polling: PollingSettings,
}

impl CallSettings {
    pub fn new() -> Self {
        Self {
            bundling_enabled: true,
            auto_paginate: true,
            ..Default::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn bundle(mut self, bundle: BundleOptions) -> Self {
        self.bundle = Some(bundle);
        self
    }

    pub fn polling(mut self, polling: PollingSettings) -> Self {
        self.polling = polling;
        self
    }

    /// Validate retry and bundle configuration.
    pub fn validate(&self) -> Result<(), GaxError> {
        if let Some(retry) = &self.retry {
            retry.backoff.validate()?;
        }
        if let Some(bundle) = &self.bundle {
            bundle.validate()?;
        }
        Ok(())
    }

    /// Merge per-call options over these settings.
    ///
    /// Option semantics:
    /// - `timeout` with a retry policy bounds both the attempt timeouts and
    ///   the total timeout; without one it is the single-attempt timeout.
    /// - `retry` replaces the retry policy; `retry_codes` and `backoff`
    ///   replace one half of it; `no_retry` removes it.
    /// - `max_retries` switches the backoff to a retry count and clears the
    ///   total timeout.
    /// - headers are layered over the defaults, per-call values winning.
    pub fn merge(&self, options: Option<&CallOptions>) -> CallSettings {
        let mut merged = self.clone();
        let Some(options) = options else {
            return merged;
        };

        if let Some(retry) = &options.retry {
            merged.retry = Some(retry.clone());
        }
        if options.no_retry {
            merged.retry = None;
        }
        if let Some(retry) = merged.retry.as_mut() {
            if let Some(codes) = &options.retry_codes {
                retry.retry_codes = codes.clone();
            }
            if let Some(backoff) = &options.backoff {
                retry.backoff = backoff.clone();
            }
            if let Some(max_retries) = options.max_retries {
                retry.backoff.max_retries = Some(max_retries);
                retry.backoff.total_timeout = None;
            }
        }

        if let Some(timeout) = options.timeout {
            merged.timeout = Some(timeout);
            if let Some(retry) = merged.retry.as_mut() {
                retry.backoff.initial_rpc_timeout = timeout;
                retry.backoff.max_rpc_timeout = timeout;
                if retry.backoff.max_retries.is_none() {
                    retry.backoff.total_timeout = Some(timeout);
                }
            }
        }

        if let Some(enabled) = options.bundling {
            merged.bundling_enabled = enabled;
        }
        if let Some(auto) = options.auto_paginate {
            merged.auto_paginate = auto;
        }
        if options.page_token.is_some() {
            merged.page_token = options.page_token.clone();
        }
        if options.page_size.is_some() {
            merged.page_size = options.page_size;
        }
        if options.max_results.is_some() {
            merged.max_results = options.max_results;
        }
        if let Some(polling) = &options.polling {
            merged.polling = polling.clone();
        }
        merged.headers = layer_headers(merged.headers, &options.headers);
        merged
    }
}
