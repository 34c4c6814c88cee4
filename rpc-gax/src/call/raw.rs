//! Raw calls: the transport-level functions the runtime wraps.
//!
//! A raw call is supplied by the transport. The runtime invokes it once per
//! attempt with a [`CallContext`]; dropping the returned future aborts the
//! attempt, which is how cancellation reaches the transport.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use http::HeaderMap;
use rpc_gax_core::Status;

use crate::metadata::Metadata;
use crate::GaxError;

/// Per-attempt context handed to a raw call.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    /// Fully-qualified method name.
    pub method: String,
    /// Request headers: auth headers layered under configured and per-call
    /// headers.
    pub headers: HeaderMap,
    /// Deadline for this attempt, if any.
    pub timeout: Option<Duration>,
    /// Zero-based attempt number.
    pub attempt: u32,
}

impl CallContext {
    pub fn new<S: Into<String>>(method: S) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// A unary raw call.
///
/// Closures of the shape `Fn(Req, CallContext) -> impl Future<Output =
/// Result<Res, GaxError>>` implement this trait.
pub trait UnaryCall<Req, Res>: Send + Sync + 'static {
    fn call(&self, request: Req, ctx: CallContext) -> BoxFuture<'static, Result<Res, GaxError>>;
}

impl<Req, Res, F, Fut> UnaryCall<Req, Res> for F
where
    F: Fn(Req, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, GaxError>> + Send + 'static,
{
    fn call(&self, request: Req, ctx: CallContext) -> BoxFuture<'static, Result<Res, GaxError>> {
        Box::pin(self(request, ctx))
    }
}

/// The request side of a streaming raw call.
pub enum StreamRequest<Req> {
    /// Server streaming: one request message.
    Single(Req),
    /// Client and bidirectional streaming: messages written by the caller.
    Stream(BoxStream<'static, Req>),
}

impl<Req> std::fmt::Debug for StreamRequest<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamRequest::Single(_) => f.write_str("StreamRequest::Single"),
            StreamRequest::Stream(_) => f.write_str("StreamRequest::Stream"),
        }
    }
}

/// A signal from a streaming transport.
///
/// The stream ending (`None`) is the end signal. An `Error` is terminal; the
/// transport should not yield anything after it.
#[derive(Debug)]
pub enum TransportEvent<Res> {
    Metadata(Metadata),
    Data(Res),
    Status(Status),
    Error(GaxError),
}

pub type TransportStream<Res> = BoxStream<'static, TransportEvent<Res>>;

/// A streaming raw call.
///
/// Establishing the stream may fail (the returned future resolves to an
/// error); failures after that arrive as [`TransportEvent::Error`].
pub trait StreamingCall<Req, Res>: Send + Sync + 'static {
    fn call(
        &self,
        request: StreamRequest<Req>,
        ctx: CallContext,
    ) -> BoxFuture<'static, Result<TransportStream<Res>, GaxError>>;
}

impl<Req, Res, F, Fut> StreamingCall<Req, Res> for F
where
    F: Fn(StreamRequest<Req>, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TransportStream<Res>, GaxError>> + Send + 'static,
{
    fn call(
        &self,
        request: StreamRequest<Req>,
        ctx: CallContext,
    ) -> BoxFuture<'static, Result<TransportStream<Res>, GaxError>> {
        Box::pin(self(request, ctx))
    }
}

/// A raw call of either shape.
pub enum RawCall<Req, Res> {
    Unary(Arc<dyn UnaryCall<Req, Res>>),
    Streaming(Arc<dyn StreamingCall<Req, Res>>),
}

impl<Req, Res> RawCall<Req, Res> {
    pub fn unary<C: UnaryCall<Req, Res>>(call: C) -> Self {
        RawCall::Unary(Arc::new(call))
    }

    pub fn streaming<C: StreamingCall<Req, Res>>(call: C) -> Self {
        RawCall::Streaming(Arc::new(call))
    }
}

impl<Req, Res> Clone for RawCall<Req, Res> {
    fn clone(&self) -> Self {
        match self {
            RawCall::Unary(call) => RawCall::Unary(call.clone()),
            RawCall::Streaming(call) => RawCall::Streaming(call.clone()),
        }
    }
}

impl<Req, Res> std::fmt::Debug for RawCall<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawCall::Unary(_) => f.write_str("RawCall::Unary"),
            RawCall::Streaming(_) => f.write_str("RawCall::Streaming"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_closure_unary_call() {
        let raw = RawCall::<u32, u32>::unary(|req: u32, ctx: CallContext| async move {
            assert_eq!(ctx.method, "svc/Double");
            Ok::<_, GaxError>(req * 2)
        });
        let RawCall::Unary(call) = raw else {
            panic!("expected unary");
        };
        let res = call.call(21, CallContext::new("svc/Double")).await.unwrap();
        assert_eq!(res, 42);
    }

    #[tokio::test]
    async fn test_closure_streaming_call() {
        let raw = RawCall::<u32, u32>::streaming(
            |req: StreamRequest<u32>, _ctx: CallContext| async move {
                let StreamRequest::Single(n) = req else {
                    return Err(GaxError::invalid_argument("expected a single request"));
                };
                let events = (0..n).map(TransportEvent::Data);
                Ok(futures::stream::iter(events).boxed())
            },
        );
        let RawCall::Streaming(call) = raw else {
            panic!("expected streaming");
        };
        let stream = call
            .call(StreamRequest::Single(3), CallContext::default())
            .await
            .unwrap();
        let values: Vec<u32> = stream
            .filter_map(|e| async move {
                match e {
                    TransportEvent::Data(v) => Some(v),
                    _ => None,
                }
            })
            .collect()
            .await;
        assert_eq!(values, vec![0, 1, 2]);
    }
}
