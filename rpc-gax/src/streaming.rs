//! Streaming proxy.
//!
//! [`StreamProxy`] presents every streaming shape as one duplex handle: a
//! stream of [`StreamEvent`]s on the read side and [`StreamProxy::send`] on
//! the write side, enabled according to the [`StreamKind`].
//!
//! Server streams run inside a reconnect loop. When the transport fails with
//! a retryable code the raw call is invoked again, provided nothing has been
//! delivered yet or a resumption function can rebuild the request past what
//! was delivered. Retried failures are not reported; the consumer sees one
//! continuous stream.
//!
//! # Cancellation
//!
//! [`StreamProxy::cancel`] stops the stream whether or not the transport
//! stream exists yet; a cancel that lands before connection means the raw
//! call is never made. Dropping the proxy cancels it as well.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let mut proxy = watch_books.stream(Some(WatchRequest { shelf: "shelves/1".into() }), None)?;
//! while let Some(event) = proxy.next().await {
//!     match event {
//!         StreamEvent::Data(book) => println!("{:?}", book),
//!         StreamEvent::Error(e) => eprintln!("stream failed: {}", e),
//!         _ => {}
//!     }
//! }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use rpc_gax_core::Status;
use tokio::sync::mpsc;

use crate::call::{CallContext, Canceller, StreamRequest, StreamingCall, TransportEvent, TransportStream};
use crate::config::{CallSettings, HeaderProvider, layer_headers};
use crate::metadata::Metadata;
use crate::retry::{Attempt, RetryState};
use crate::GaxError;

const EVENT_BUFFER: usize = 16;

/// The shape of a streaming method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// One request, many responses. Read-only.
    Server,
    /// Many requests, one response. Write-only; the response arrives as a
    /// single data event.
    Client,
    /// Many requests, many responses.
    Bidi,
}

impl StreamKind {
    pub fn readable(&self) -> bool {
        matches!(self, StreamKind::Server | StreamKind::Bidi)
    }

    pub fn writable(&self) -> bool {
        matches!(self, StreamKind::Client | StreamKind::Bidi)
    }

    fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Server => "server_stream",
            StreamKind::Client => "client_stream",
            StreamKind::Bidi => "bidi_stream",
        }
    }
}

/// Rebuilds a server-stream request for reconnection from the original
/// request and the last response delivered.
pub type ResumptionFn<Req, Res> = Arc<dyn Fn(&Req, Option<&Res>) -> Req + Send + Sync>;

pub struct StreamDescriptor<Req, Res> {
    pub kind: StreamKind,
    pub(crate) resumption: Option<ResumptionFn<Req, Res>>,
}

impl<Req, Res> StreamDescriptor<Req, Res> {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            resumption: None,
        }
    }

    /// Allow reconnecting a server stream after data was delivered.
    pub fn with_resumption<F>(mut self, resumption: F) -> Self
    where
        F: Fn(&Req, Option<&Res>) -> Req + Send + Sync + 'static,
    {
        self.resumption = Some(Arc::new(resumption));
        self
    }
}

impl<Req, Res> Clone for StreamDescriptor<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            resumption: self.resumption.clone(),
        }
    }
}

impl<Req, Res> std::fmt::Debug for StreamDescriptor<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDescriptor")
            .field("kind", &self.kind)
            .field("resumption", &self.resumption.is_some())
            .finish()
    }
}

/// The success signal synthesized on first metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseStatus {
    pub code: u16,
    pub message: String,
}

impl ResponseStatus {
    fn ok() -> Self {
        Self {
            code: 200,
            message: "OK".to_string(),
        }
    }
}

/// Signals relayed by a [`StreamProxy`].
///
/// A stream finishes with either `End` or `Error`, never both.
#[derive(Debug)]
pub enum StreamEvent<Res> {
    Metadata(Metadata),
    /// Emitted once, right after the first metadata.
    Response(ResponseStatus),
    Data(Res),
    Status(Status),
    Error(GaxError),
    End,
}

pub(crate) struct StreamInvoker<Req, Res> {
    method: String,
    raw: Arc<dyn StreamingCall<Req, Res>>,
    auth: Arc<dyn HeaderProvider>,
}

impl<Req: 'static, Res: 'static> StreamInvoker<Req, Res> {
    pub(crate) fn new(
        method: String,
        raw: Arc<dyn StreamingCall<Req, Res>>,
        auth: Arc<dyn HeaderProvider>,
    ) -> Self {
        Self { method, raw, auth }
    }

    async fn connect(
        &self,
        request: StreamRequest<Req>,
        attempt: Attempt,
        settings: &CallSettings,
    ) -> Result<TransportStream<Res>, GaxError> {
        let provided = self.auth.headers(&self.method).await?;
        let ctx = CallContext {
            method: self.method.clone(),
            headers: layer_headers(provided, &settings.headers),
            timeout: attempt.timeout,
            attempt: attempt.number,
        };
        self.raw.call(request, ctx).await
    }
}

/// Forwards events to the proxy, synthesizing the response signal.
struct Relay<Res> {
    tx: mpsc::Sender<StreamEvent<Res>>,
    metadata_seen: bool,
}

impl<Res> Relay<Res> {
    /// Returns false once the proxy is gone.
    async fn emit(&mut self, event: StreamEvent<Res>) -> bool {
        let first_metadata = matches!(event, StreamEvent::Metadata(_)) && !self.metadata_seen;
        if self.tx.send(event).await.is_err() {
            return false;
        }
        if first_metadata {
            self.metadata_seen = true;
            return self
                .tx
                .send(StreamEvent::Response(ResponseStatus::ok()))
                .await
                .is_ok();
        }
        true
    }
}

enum Outcome {
    /// Transport finished cleanly, with its final status if it sent one.
    End(Option<Status>),
    Failed(GaxError),
    Cancelled,
    Closed,
}

/// Relay one transport stream until it finishes.
///
/// With `hold_status` the status is returned in the outcome instead of being
/// relayed, so a retried attempt's status never reaches the consumer.
async fn pump<Res, F>(
    mut stream: TransportStream<Res>,
    relay: &mut Relay<Res>,
    canceller: &Canceller,
    hold_status: bool,
    mut on_data: F,
) -> Outcome
where
    F: FnMut(&Res),
{
    let mut status = None;
    loop {
        let event = tokio::select! {
            biased;
            _ = canceller.cancelled() => return Outcome::Cancelled,
            event = stream.next() => event,
        };
        let forwarded = match event {
            None => return Outcome::End(status),
            Some(TransportEvent::Error(err)) => return Outcome::Failed(err),
            Some(TransportEvent::Status(s)) if hold_status => {
                status = Some(s);
                continue;
            }
            Some(TransportEvent::Status(s)) => StreamEvent::Status(s),
            Some(TransportEvent::Metadata(m)) => StreamEvent::Metadata(m),
            Some(TransportEvent::Data(data)) => {
                on_data(&data);
                StreamEvent::Data(data)
            }
        };
        // A full buffer must not hold the transport open past cancel.
        let sent = tokio::select! {
            biased;
            _ = canceller.cancelled() => return Outcome::Cancelled,
            sent = relay.emit(forwarded) => sent,
        };
        if !sent {
            return Outcome::Closed;
        }
    }
}

async fn finish<Res>(mut relay: Relay<Res>, outcome: Outcome) {
    match outcome {
        Outcome::End(status) => {
            if let Some(status) = status {
                if !relay.emit(StreamEvent::Status(status)).await {
                    return;
                }
            }
            relay.emit(StreamEvent::End).await;
        }
        Outcome::Failed(err) => {
            relay.emit(StreamEvent::Error(err)).await;
        }
        Outcome::Cancelled => {
            relay
                .emit(StreamEvent::Error(GaxError::cancelled("stream cancelled")))
                .await;
        }
        Outcome::Closed => {}
    }
}

async fn run_server<Req, Res>(
    invoker: Arc<StreamInvoker<Req, Res>>,
    request: Req,
    settings: CallSettings,
    resumption: Option<ResumptionFn<Req, Res>>,
    mut relay: Relay<Res>,
    canceller: Canceller,
) where
    Req: Clone + Send + Sync + 'static,
    Res: Clone + Send + 'static,
{
    let mut retry = RetryState::new(settings.retry.clone(), settings.timeout);
    let mut next_request = request.clone();
    let mut last: Option<Res> = None;
    let mut delivered = false;

    loop {
        if canceller.is_cancelled() {
            return finish(relay, Outcome::Cancelled).await;
        }
        let connected = tokio::select! {
            biased;
            _ = canceller.cancelled() => return finish(relay, Outcome::Cancelled).await,
            connected = invoker.connect(
                StreamRequest::Single(next_request.clone()),
                retry.current(),
                &settings,
            ) => connected,
        };
        let failure = match connected {
            Err(err) => err,
            Ok(stream) => {
                let keep_last = resumption.is_some();
                let outcome = pump(stream, &mut relay, &canceller, true, |data: &Res| {
                    delivered = true;
                    if keep_last {
                        last = Some(data.clone());
                    }
                })
                .await;
                match outcome {
                    Outcome::Failed(err) => err,
                    other => return finish(relay, other).await,
                }
            }
        };

        if delivered && resumption.is_none() {
            return finish(relay, Outcome::Failed(failure)).await;
        }
        let delay = match retry.on_failure(failure) {
            Ok(delay) => delay,
            Err(err) => return finish(relay, Outcome::Failed(err)).await,
        };
        tokio::select! {
            biased;
            _ = canceller.cancelled() => return finish(relay, Outcome::Cancelled).await,
            _ = tokio::time::sleep(delay) => {}
        }
        if let Some(resume) = &resumption {
            next_request = resume(&request, last.as_ref());
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %invoker.method,
            attempt = retry.attempt(),
            "reconnecting server stream"
        );
    }
}

async fn run_duplex<Req, Res>(
    invoker: Arc<StreamInvoker<Req, Res>>,
    writes: mpsc::Receiver<Req>,
    settings: CallSettings,
    mut relay: Relay<Res>,
    canceller: Canceller,
) where
    Req: Send + 'static,
    Res: Send + 'static,
{
    let requests = stream::unfold(writes, |mut writes| async move {
        writes.recv().await.map(|request| (request, writes))
    })
    .boxed();
    let attempt = Attempt {
        number: 0,
        timeout: settings.timeout,
    };
    let connected = tokio::select! {
        biased;
        _ = canceller.cancelled() => return finish(relay, Outcome::Cancelled).await,
        connected = invoker.connect(StreamRequest::Stream(requests), attempt, &settings) => connected,
    };
    let outcome = match connected {
        Ok(stream) => pump(stream, &mut relay, &canceller, false, |_: &Res| {}).await,
        Err(err) => Outcome::Failed(err),
    };
    finish(relay, outcome).await
}

/// A duplex handle over one streaming call.
pub struct StreamProxy<Req, Res> {
    kind: StreamKind,
    events: mpsc::Receiver<StreamEvent<Res>>,
    writer: Option<mpsc::Sender<Req>>,
    canceller: Canceller,
}

impl<Req, Res> StreamProxy<Req, Res>
where
    Req: Clone + Send + Sync + 'static,
    Res: Clone + Send + 'static,
{
    /// Start the streaming call on its own task.
    ///
    /// Server streams require `request`. For client and bidirectional streams
    /// a `request`, if given, is the first message written.
    pub(crate) fn start(
        invoker: Arc<StreamInvoker<Req, Res>>,
        descriptor: &StreamDescriptor<Req, Res>,
        request: Option<Req>,
        settings: CallSettings,
    ) -> Result<Self, GaxError> {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let relay = Relay {
            tx,
            metadata_seen: false,
        };
        let canceller = Canceller::new();
        let kind = descriptor.kind;

        #[cfg(feature = "tracing")]
        let span = tracing::info_span!(
            "rpc.call",
            rpc.method = %invoker.method,
            rpc.type = kind.as_str(),
            otel.kind = "client",
        );

        let writer = match kind {
            StreamKind::Server => {
                let request = request.ok_or_else(|| {
                    GaxError::Config("server streaming call requires a request".into())
                })?;
                let task = run_server(
                    invoker,
                    request,
                    settings,
                    descriptor.resumption.clone(),
                    relay,
                    canceller.clone(),
                );
                #[cfg(feature = "tracing")]
                let task = tracing::Instrument::instrument(task, span);
                tokio::spawn(task);
                None
            }
            StreamKind::Client | StreamKind::Bidi => {
                let (writer, writes) = mpsc::channel(EVENT_BUFFER);
                if let Some(request) = request {
                    writer
                        .try_send(request)
                        .map_err(|_| GaxError::internal("write buffer unavailable"))?;
                }
                let task = run_duplex(invoker, writes, settings, relay, canceller.clone());
                #[cfg(feature = "tracing")]
                let task = tracing::Instrument::instrument(task, span);
                tokio::spawn(task);
                Some(writer)
            }
        };

        Ok(Self {
            kind,
            events,
            writer,
            canceller,
        })
    }
}

impl<Req, Res> StreamProxy<Req, Res> {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn readable(&self) -> bool {
        self.kind.readable()
    }

    /// Whether [`send`](Self::send) is accepted.
    pub fn writable(&self) -> bool {
        self.kind.writable() && self.writer.is_some()
    }

    /// Write a request message.
    pub async fn send(&self, request: Req) -> Result<(), GaxError> {
        let Some(writer) = &self.writer else {
            return Err(GaxError::Config(format!(
                "{} stream is not writable",
                self.kind.as_str()
            )));
        };
        writer
            .send(request)
            .await
            .map_err(|_| GaxError::cancelled("stream is closed"))
    }

    /// Finish writing; the server sees the end of the request stream.
    pub fn close_send(&mut self) {
        self.writer = None;
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent<Res>> {
        self.events.recv().await
    }

    /// Only the data, with the terminal error (if any) as the last item.
    pub fn into_data_stream(self) -> BoxStream<'static, Result<Res, GaxError>>
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        self.filter_map(|event| async move {
            match event {
                StreamEvent::Data(data) => Some(Ok(data)),
                StreamEvent::Error(err) => Some(Err(err)),
                _ => None,
            }
        })
        .boxed()
    }
}

impl<Req, Res> Stream for StreamProxy<Req, Res> {
    type Item = StreamEvent<Res>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl<Req, Res> Drop for StreamProxy<Req, Res> {
    fn drop(&mut self) {
        self.canceller.cancel();
    }
}
