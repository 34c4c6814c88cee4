//! HTTP+JSON fallback transport.
//!
//! [`FallbackCall`] is a unary raw call for environments without a native
//! RPC channel. Each request is transcoded with the method's [`HttpRule`]s,
//! sent as JSON through an [`HttpClient`], and the JSON response decoded
//! back into the response message. Non-2xx responses are parsed as JSON
//! status bodies and surfaced as [`GaxError::Status`], carrying the response
//! headers as metadata.
//!
//! # Example
//!
//! ```ignore
//! use rpc_gax::fallback::{FallbackCall, HyperHttpClient};
//! use rpc_gax::transcoding::HttpRule;
//! use rpc_gax::{CallSettings, Descriptor, wrap};
//!
//! let raw = FallbackCall::new(
//!     "https://library.example.com",
//!     vec![HttpRule::get("/v1/{name=shelves/*/books/*}")],
//!     HyperHttpClient::new(),
//! )?
//! .into_raw_call::<GetBookRequest, Book>();
//!
//! let get_book = wrap("library.v1.Library/GetBook", raw, CallSettings::new(), Descriptor::None)?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{CONTENT_TYPE, HeaderValue};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rpc_gax_core::status_from_http_body;

use crate::call::{CallContext, RawCall};
use crate::fields::{self, Message};
use crate::transcoding::{HttpRule, transcode};
use crate::GaxError;

/// Asks the server for JSON with enums as numbers.
const ALT_JSON: &str = "$alt=json%3Benum-encoding=int";

/// Server-side deadline, in seconds.
pub const SERVER_TIMEOUT_HEADER: &str = "x-server-timeout";

/// Sends one buffered HTTP request.
pub trait HttpClient: Send + Sync + 'static {
    fn send(
        &self,
        request: http::Request<Bytes>,
    ) -> BoxFuture<'_, Result<http::Response<Bytes>, GaxError>>;
}

/// [`HttpClient`] on hyper_util's pooled legacy client (plain HTTP/1.1).
#[derive(Clone)]
pub struct HyperHttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl std::fmt::Debug for HyperHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperHttpClient").finish_non_exhaustive()
    }
}

impl Default for HyperHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperHttpClient {
    pub fn new() -> Self {
        let mut builder = Client::builder(TokioExecutor::new());
        // Required for pool_idle_timeout to take effect.
        builder.pool_timer(TokioTimer::new());
        builder.pool_idle_timeout(Duration::from_secs(90));
        Self {
            client: builder.build_http(),
        }
    }
}

impl HttpClient for HyperHttpClient {
    fn send(
        &self,
        request: http::Request<Bytes>,
    ) -> BoxFuture<'_, Result<http::Response<Bytes>, GaxError>> {
        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let response: http::Response<hyper::body::Incoming> = self
                .client
                .request(http::Request::from_parts(parts, Full::new(body)))
                .await
                .map_err(|e| GaxError::Transport(format!("request failed: {}", e)))?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| GaxError::Transport(format!("failed to read response body: {}", e)))?
                .to_bytes();
            Ok(http::Response::from_parts(parts, body))
        })
    }
}

/// A unary raw call over HTTP+JSON.
pub struct FallbackCall<C> {
    base_url: String,
    rules: Vec<HttpRule>,
    client: C,
}

impl<C: HttpClient> FallbackCall<C> {
    /// Fails when a rule's pattern is malformed.
    pub fn new(
        base_url: impl Into<String>,
        rules: Vec<HttpRule>,
        client: C,
    ) -> Result<Self, GaxError> {
        rules.iter().try_for_each(HttpRule::validate)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            rules,
            client,
        })
    }

    pub fn into_raw_call<Req: Message, Res: Message>(self) -> RawCall<Req, Res> {
        let this = Arc::new(self);
        RawCall::unary(move |request: Req, ctx: CallContext| {
            let this = Arc::clone(&this);
            async move { this.execute(request, ctx).await }
        })
    }

    async fn execute<Req: Message, Res: Message>(
        &self,
        request: Req,
        ctx: CallContext,
    ) -> Result<Res, GaxError> {
        let request = self.build_request(&request, &ctx)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %ctx.method,
            http.method = %request.method(),
            url = %request.uri(),
            "sending fallback request"
        );

        let response = match ctx.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.client.send(request))
                .await
                .map_err(|_| {
                    GaxError::deadline_exceeded(format!(
                        "{}: no response within {}ms",
                        ctx.method,
                        timeout.as_millis()
                    ))
                })??,
            None => self.client.send(request).await?,
        };
        decode_response(response)
    }

    fn build_request<Req: Message>(
        &self,
        request: &Req,
        ctx: &CallContext,
    ) -> Result<http::Request<Bytes>, GaxError> {
        let value = fields::to_value(request)?;
        let transcoded = transcode(&value, &self.rules).ok_or_else(|| {
            GaxError::Encode(format!(
                "{}: request does not match any HTTP rule",
                ctx.method
            ))
        })?;

        let mut uri = format!("{}{}?", self.base_url, transcoded.url);
        if !transcoded.query_string.is_empty() {
            uri.push_str(&transcoded.query_string);
            uri.push('&');
        }
        uri.push_str(ALT_JSON);

        let body = match &transcoded.body {
            Some(body) => Bytes::from(
                serde_json::to_vec(body)
                    .map_err(|e| GaxError::Encode(format!("JSON encoding failed: {}", e)))?,
            ),
            None => Bytes::new(),
        };

        let mut http_request = http::Request::builder()
            .method(transcoded.method)
            .uri(uri)
            .body(body)
            .map_err(|e| GaxError::Encode(format!("invalid HTTP request: {}", e)))?;
        let headers = http_request.headers_mut();
        headers.extend(ctx.headers.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(timeout) = ctx.timeout {
            let value = HeaderValue::from_str(&format!("{:.3}", timeout.as_secs_f64()))
                .map_err(|e| GaxError::Encode(format!("invalid timeout header: {}", e)))?;
            headers.insert(SERVER_TIMEOUT_HEADER, value);
        }
        Ok(http_request)
    }
}

impl<C> std::fmt::Debug for FallbackCall<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackCall")
            .field("base_url", &self.base_url)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

/// Decode a JSON response, or the error it carries.
///
/// An empty success body decodes as `{}`.
pub fn decode_response<Res: Message>(response: http::Response<Bytes>) -> Result<Res, GaxError> {
    let (parts, body) = response.into_parts();
    if !parts.status.is_success() {
        let status = status_from_http_body(parts.status.as_u16(), &body);
        return Err(GaxError::from(status).with_metadata(parts.headers));
    }
    let body: &[u8] = if body.is_empty() { b"{}" } else { &body };
    serde_json::from_slice(body)
        .map_err(|e| GaxError::Decode(format!("JSON decoding failed: {}", e)))
}
