//! Call-execution runtime for generated RPC clients.
//!
//! This crate sits between a generated client method and a raw transport
//! call. It does not speak a wire protocol itself; it gives the raw call
//! retry with backoff, deadlines, cancellation, request bundling, response
//! pagination, a uniform streaming handle and, for environments without a
//! native RPC channel, an HTTP+JSON transport built from transcoding rules.
//!
//! ## Features
//!
//! - Retry with exponential backoff, per-attempt and total timeouts
//! - One execution per invocation, observed by awaiting or by callback
//! - Cancellation before, during and between attempts
//! - Server, client and bidirectional streaming behind one handle, with
//!   reconnection of server streams
//! - Opportunistic bundling of compatible requests
//! - Lazy page and item streams over token-paged methods
//! - Long-running operation polling
//! - gRPC to HTTP+JSON transcoding and a hyper-based fallback transport
//!
//! ## Example
//!
//! ```ignore
//! use rpc_gax::{
//!     BackoffSettings, CallOptions, CallSettings, Descriptor, RawCall, RetryCodes, RetryOptions,
//!     wrap,
//! };
//! use std::time::Duration;
//!
//! let settings = CallSettings::new()
//!     .retry(RetryOptions::new(RetryCodes::idempotent(), BackoffSettings::default()));
//!
//! let get_book = wrap(
//!     "library.v1.Library/GetBook",
//!     RawCall::unary(|req: GetBookRequest, ctx| transport.get_book(req, ctx)),
//!     settings,
//!     Descriptor::None,
//! )?;
//!
//! // Await the result
//! let book = get_book.call(request.clone(), None).await?;
//!
//! // Or take it in a callback, with a per-call timeout
//! let canceller = get_book.call_with_callback(
//!     request,
//!     Some(CallOptions::new().timeout(Duration::from_secs(5))),
//!     |result| println!("{:?}", result),
//! );
//! canceller.cancel();
//! ```
//!
//! ## Paging Example
//!
//! ```ignore
//! use futures::TryStreamExt;
//! use rpc_gax::paging::PageDescriptor;
//!
//! let list_books = wrap(
//!     "library.v1.Library/ListBooks",
//!     raw_list_books,
//!     CallSettings::new(),
//!     PageDescriptor::new("page_token", "next_page_token", "books").into(),
//! )?;
//!
//! let mut books = list_books.items::<Book>(request, None)?;
//! while let Some(book) = books.try_next().await? {
//!     println!("{}", book.title);
//! }
//! ```
//!
//! ## Bundling Example
//!
//! ```ignore
//! use rpc_gax::bundling::BundleDescriptor;
//! use rpc_gax::BundleOptions;
//!
//! let settings = CallSettings::new().bundle(BundleOptions::new(100, 1 << 20, Duration::from_millis(50)));
//! let publish = wrap(
//!     "pubsub.v1.Publisher/Publish",
//!     raw_publish,
//!     settings,
//!     BundleDescriptor::new("messages", ["topic"]).subresponse_field("message_ids").into(),
//! )?;
//!
//! // Both join one bundle; each gets its own slice of message_ids.
//! let (a, b) = tokio::join!(publish.call(first, None), publish.call(second, None));
//! ```
//!
//! ## Cancellation
//!
//! Every [`CallHandle`] and [`StreamProxy`](streaming::StreamProxy) can be
//! cancelled. A cancelled call resolves with [`Code::Canceled`]; cancelling a
//! settled call has no effect. Deadlines produce [`Code::DeadlineExceeded`]
//! and are only checked between attempts: an attempt in flight runs until its
//! own timeout.
//!
//! ## Feature Flags
//!
//! ### Observability
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `tracing` (default) | Spans for calls, events for retries, flushes, reconnects and page fetches | `tracing` |
//!
//! When enabled, each invocation runs in a span with:
//! - `rpc.method`: Full method name (e.g., "package.Service/Method")
//! - `rpc.type`: Call type ("unary", "bundle", "server_stream", "client_stream", "bidi_stream")
//! - `otel.kind`: "client"
//!
//! ```toml
//! # Without tracing
//! rpc-gax = { version = "0.1", default-features = false }
//! ```

mod backoff;
pub mod bundling;
mod call;
pub mod config;
mod error;
pub mod fallback;
pub mod fields;
pub mod longrunning;
mod metadata;
pub mod paging;
pub mod retry;
pub mod streaming;
pub mod transcoding;

pub use backoff::{ExponentialBackoff, next_delay};
pub use call::{
    ApiCall, CallContext, CallHandle, Canceller, Descriptor, RawCall, StreamRequest,
    StreamingCall, TransportEvent, TransportStream, UnaryCall, wrap, wrap_with_auth,
};
pub use error::GaxError;
pub use fields::Message;
pub use metadata::Metadata;

// Re-export from config module
pub use config::{
    BackoffSettings, BundleOptions, CallOptions, CallSettings, Chain, HeaderProvider,
    PollingSettings, RetryCodes, RetryOptions, StaticHeaders,
};

// Re-export core types that users need
pub use rpc_gax_core::{Code, ErrorDetail, Status, StatusBody};
