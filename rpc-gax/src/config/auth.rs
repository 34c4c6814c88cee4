//! Header providers.
//!
//! A [`HeaderProvider`] supplies request headers (typically credentials)
//! before every attempt of a call. Providers compose with [`Chain`]; the unit
//! type is the empty provider.
//!
//! # Example
//!
//! ```
//! use rpc_gax::{Chain, StaticHeaders};
//!
//! let auth = StaticHeaders::new("authorization", "Bearer token123");
//! let client = StaticHeaders::new("x-goog-api-client", "gax/0.1");
//! let provider = Chain(auth, client);
//! ```

use futures::future::{BoxFuture, FutureExt};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::GaxError;

/// Supplies headers for a call attempt.
///
/// `method` is the fully-qualified method name of the call being made.
/// Returning an error aborts the attempt; the error is subject to the call's
/// retry policy like any other.
pub trait HeaderProvider: Send + Sync + 'static {
    fn headers(&self, method: &str) -> BoxFuture<'_, Result<HeaderMap, GaxError>>;
}

impl HeaderProvider for () {
    fn headers(&self, _method: &str) -> BoxFuture<'_, Result<HeaderMap, GaxError>> {
        futures::future::ready(Ok(HeaderMap::new())).boxed()
    }
}

/// Two providers applied in order; on a conflicting name `B` wins.
#[derive(Clone, Debug)]
pub struct Chain<A, B>(pub A, pub B);

impl<A, B> HeaderProvider for Chain<A, B>
where
    A: HeaderProvider,
    B: HeaderProvider,
{
    fn headers(&self, method: &str) -> BoxFuture<'_, Result<HeaderMap, GaxError>> {
        let method = method.to_string();
        async move {
            let mut headers = self.0.headers(&method).await?;
            for (name, value) in self.1.headers(&method).await? {
                if let Some(name) = name {
                    headers.insert(name, value);
                }
            }
            Ok(headers)
        }
        .boxed()
    }
}

/// A provider that always returns the same headers.
#[derive(Clone, Debug, Default)]
pub struct StaticHeaders {
    headers: HeaderMap,
}

impl StaticHeaders {
    /// Create a provider with one header.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid.
    pub fn new(name: &str, value: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            name.parse::<HeaderName>().expect("invalid header name"),
            value.parse::<HeaderValue>().expect("invalid header value"),
        );
        Self { headers }
    }

    /// Try to create a provider with one header, returning an error if invalid.
    pub fn try_new(name: &str, value: &str) -> Result<Self, GaxError> {
        let name: HeaderName = name
            .parse()
            .map_err(|_| GaxError::Config(format!("invalid header name: {}", name)))?;
        let value: HeaderValue = value
            .parse()
            .map_err(|_| GaxError::Config(format!("invalid header value: {}", value)))?;
        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        Ok(Self { headers })
    }

    pub fn from_map(headers: HeaderMap) -> Self {
        Self { headers }
    }
}

impl HeaderProvider for StaticHeaders {
    fn headers(&self, _method: &str) -> BoxFuture<'_, Result<HeaderMap, GaxError>> {
        futures::future::ready(Ok(self.headers.clone())).boxed()
    }
}

/// Layer `explicit` headers over provider headers; explicit values win.
///
/// A name set in `explicit` replaces every provided value of that name, and
/// keeps all of its own values.
pub(crate) fn layer_headers(provided: HeaderMap, explicit: &HeaderMap) -> HeaderMap {
    let mut headers = provided;
    for name in explicit.keys() {
        headers.remove(name);
    }
    for (name, value) in explicit.iter() {
        headers.append(name.clone(), value.clone());
    }
    headers
}
