//! Call configuration.
//!
//! - [`CallSettings`]: immutable per-method defaults
//! - [`CallOptions`]: per-call overrides merged over the defaults
//! - [`BackoffSettings`] and [`RetryOptions`]: retry behavior
//! - [`BundleOptions`]: bundle thresholds and limits
//! - [`HeaderProvider`]: headers fetched before every attempt
//! - [`client_config`]: JSON client configuration loading

mod auth;
pub mod client_config;
mod options;
mod settings;

pub(crate) use auth::layer_headers;
pub use auth::{Chain, HeaderProvider, StaticHeaders};
pub use options::CallOptions;
pub use settings::{
    BackoffSettings, BundleOptions, CallSettings, PollingSettings, RetryCodes, RetryOptions,
    defaults,
};
