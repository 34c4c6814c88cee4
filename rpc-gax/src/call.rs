//! The call wrapper.
//!
//! [`wrap`] turns a raw call plus [`CallSettings`](crate::CallSettings) and a
//! [`Descriptor`] into an [`ApiCall`]. Each invocation runs once on its own
//! task and is observed either by awaiting the returned [`CallHandle`] or by
//! a callback; both see the same result.

mod api;
mod descriptor;
mod handle;
mod raw;
mod unary;

pub use api::{ApiCall, wrap, wrap_with_auth};
pub use descriptor::Descriptor;
pub use handle::{CallHandle, Canceller};
pub use raw::{
    CallContext, RawCall, StreamRequest, StreamingCall, TransportEvent, TransportStream, UnaryCall,
};
pub(crate) use unary::UnaryInvoker;
