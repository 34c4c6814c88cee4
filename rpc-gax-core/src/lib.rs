//! Core RPC status types.
//!
//! This crate provides the types shared by the call runtime (`rpc-gax`) and
//! anything that produces or inspects RPC failures.
//!
//! ## Modules
//!
//! - [`error`]: status codes, error details and [`Status`]
//! - [`body`]: JSON status bodies carried by HTTP error responses

mod body;
mod error;

pub use body::*;
pub use error::*;
