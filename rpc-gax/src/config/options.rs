//! Per-call overrides.
//!
//! [`CallOptions`] carries the knobs a caller may change for one invocation.
//! Unset fields leave the method's [`CallSettings`](super::CallSettings)
//! untouched; see [`CallSettings::merge`](super::CallSettings::merge) for how
//! each field applies.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

use super::settings::{BackoffSettings, PollingSettings, RetryCodes, RetryOptions};

/// Options for configuring individual calls.
///
/// # Example
///
/// ```
/// use rpc_gax::CallOptions;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .max_retries(3)
///     .header("x-request-id", "abc-123");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry: Option<RetryOptions>,
    pub(crate) no_retry: bool,
    pub(crate) retry_codes: Option<RetryCodes>,
    pub(crate) backoff: Option<BackoffSettings>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) bundling: Option<bool>,
    pub(crate) auto_paginate: Option<bool>,
    pub(crate) page_token: Option<String>,
    pub(crate) page_size: Option<u64>,
    pub(crate) max_results: Option<usize>,
    pub(crate) polling: Option<PollingSettings>,
    pub(crate) headers: HeaderMap,
}

impl CallOptions {
    /// Create new default call options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout for this call.
    ///
    /// With a retry policy in force this bounds every attempt and the whole
    /// retry sequence; otherwise it bounds the single attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the configured timeout, if any.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Replace the retry policy for this call.
    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self.no_retry = false;
        self
    }

    /// Disable retrying for this call.
    pub fn no_retry(mut self) -> Self {
        self.retry = None;
        self.no_retry = true;
        self
    }

    /// Replace only the set of retryable codes.
    pub fn retry_codes(mut self, codes: RetryCodes) -> Self {
        self.retry_codes = Some(codes);
        self
    }

    /// Replace only the backoff schedule.
    pub fn backoff(mut self, backoff: BackoffSettings) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Bound retrying by a retry count instead of a total timeout.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Turn bundling on or off for this call.
    pub fn bundling(mut self, enabled: bool) -> Self {
        self.bundling = Some(enabled);
        self
    }

    /// Whether a paged call collects every page.
    pub fn auto_paginate(mut self, auto: bool) -> Self {
        self.auto_paginate = Some(auto);
        self
    }

    /// Start paging from this token.
    pub fn page_token<S: Into<String>>(mut self, token: S) -> Self {
        self.page_token = Some(token.into());
        self
    }

    /// Request this many resources per page.
    pub fn page_size(mut self, size: u64) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Stop paging after this many resources.
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Override the long-running operation polling schedule.
    pub fn polling(mut self, polling: PollingSettings) -> Self {
        self.polling = Some(polling);
        self
    }

    /// Add a custom header for this call.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: std::fmt::Debug,
        V: TryInto<HeaderValue>,
        V::Error: std::fmt::Debug,
    {
        let name = name.try_into().expect("invalid header name");
        let value = value.try_into().expect("invalid header value");
        self.headers.insert(name, value);
        self
    }

    /// Try to add a custom header for this call.
    ///
    /// Returns `None` if the header name or value is invalid.
    pub fn try_header<K, V>(mut self, name: K, value: V) -> Option<Self>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        let name = name.try_into().ok()?;
        let value = value.try_into().ok()?;
        self.headers.insert(name, value);
        Some(self)
    }

    /// Set all custom headers for this call, replacing any existing headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}
