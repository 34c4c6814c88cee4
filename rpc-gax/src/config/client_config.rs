//! Client configuration files.
//!
//! Parses the JSON client configuration format and turns one service's
//! entry into per-method [`CallSettings`].
//!
//! ```json
//! {
//!   "interfaces": {
//!     "library.v1.Library": {
//!       "retry_codes": {"idempotent": ["DEADLINE_EXCEEDED", "UNAVAILABLE"]},
//!       "retry_params": {
//!         "default": {
//!           "initial_retry_delay_millis": 100, "retry_delay_multiplier": 1.3,
//!           "max_retry_delay_millis": 60000, "initial_rpc_timeout_millis": 20000,
//!           "rpc_timeout_multiplier": 1.0, "max_rpc_timeout_millis": 20000,
//!           "total_timeout_millis": 600000
//!         }
//!       },
//!       "methods": {
//!         "GetBook": {"timeout_millis": 30000, "retry_codes_name": "idempotent",
//!                     "retry_params_name": "default"}
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use rpc_gax_core::Code;
use serde::Deserialize;

use super::settings::{BackoffSettings, BundleOptions, CallSettings, RetryCodes, RetryOptions};
use crate::GaxError;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub interfaces: HashMap<String, InterfaceConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct InterfaceConfig {
    #[serde(default)]
    pub retry_codes: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub retry_params: HashMap<String, RetryParams>,
    #[serde(default)]
    pub methods: HashMap<String, MethodConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RetryParams {
    pub initial_retry_delay_millis: u64,
    pub retry_delay_multiplier: f64,
    pub max_retry_delay_millis: u64,
    pub initial_rpc_timeout_millis: u64,
    pub rpc_timeout_multiplier: f64,
    pub max_rpc_timeout_millis: u64,
    pub total_timeout_millis: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MethodConfig {
    pub timeout_millis: Option<u64>,
    pub retry_codes_name: Option<String>,
    pub retry_params_name: Option<String>,
    pub bundling: Option<BundlingConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BundlingConfig {
    #[serde(default)]
    pub element_count_threshold: usize,
    #[serde(default)]
    pub request_byte_threshold: usize,
    pub delay_threshold_millis: Option<u64>,
    pub element_count_limit: Option<usize>,
    pub request_byte_limit: Option<usize>,
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, GaxError> {
        serde_json::from_str(json)
            .map_err(|e| GaxError::Config(format!("invalid client config: {}", e)))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, GaxError> {
        serde_json::from_slice(bytes)
            .map_err(|e| GaxError::Config(format!("invalid client config: {}", e)))
    }
}

impl RetryParams {
    fn to_backoff(&self) -> BackoffSettings {
        BackoffSettings::new(
            Duration::from_millis(self.initial_retry_delay_millis),
            self.retry_delay_multiplier,
            Duration::from_millis(self.max_retry_delay_millis),
            Duration::from_millis(self.initial_rpc_timeout_millis),
            self.rpc_timeout_multiplier,
            Duration::from_millis(self.max_rpc_timeout_millis),
            Duration::from_millis(self.total_timeout_millis),
        )
    }
}

impl BundlingConfig {
    fn to_options(&self) -> BundleOptions {
        BundleOptions {
            element_count_threshold: self.element_count_threshold,
            request_byte_threshold: self.request_byte_threshold,
            delay_threshold: self
                .delay_threshold_millis
                .map(Duration::from_millis)
                .unwrap_or(super::settings::defaults::BUNDLE_DELAY_THRESHOLD),
            element_count_limit: self.element_count_limit,
            request_byte_limit: self.request_byte_limit,
        }
    }
}

fn parse_codes(names: &[String]) -> Result<RetryCodes, GaxError> {
    names
        .iter()
        .map(|name| {
            name.parse::<Code>()
                .map_err(|_| GaxError::Config(format!("unknown status code: {}", name)))
        })
        .collect()
}

/// Build per-method settings for `service`.
///
/// Entries in `overrides` take precedence: retry code and parameter sets are
/// layered by name, and each overridden method field replaces the base one.
/// The result is keyed by method name as written in the configuration.
pub fn construct_settings(
    service: &str,
    config: &ClientConfig,
    overrides: Option<&ClientConfig>,
) -> Result<HashMap<String, CallSettings>, GaxError> {
    let base = config
        .interfaces
        .get(service)
        .ok_or_else(|| GaxError::Config(format!("service {} not found in client config", service)))?;
    let extra = overrides.and_then(|o| o.interfaces.get(service));

    let mut retry_codes = base.retry_codes.clone();
    let mut retry_params = base.retry_params.clone();
    let mut methods = base.methods.clone();
    if let Some(extra) = extra {
        retry_codes.extend(extra.retry_codes.clone());
        retry_params.extend(extra.retry_params.clone());
        for (name, method) in &extra.methods {
            let entry = methods.entry(name.clone()).or_default();
            if method.timeout_millis.is_some() {
                entry.timeout_millis = method.timeout_millis;
            }
            if method.retry_codes_name.is_some() {
                entry.retry_codes_name = method.retry_codes_name.clone();
            }
            if method.retry_params_name.is_some() {
                entry.retry_params_name = method.retry_params_name.clone();
            }
            if method.bundling.is_some() {
                entry.bundling = method.bundling.clone();
            }
        }
    }

    let mut settings = HashMap::with_capacity(methods.len());
    for (name, method) in methods {
        let mut call = CallSettings::new();
        call.timeout = method.timeout_millis.map(Duration::from_millis);

        if let Some(codes_name) = &method.retry_codes_name {
            let codes = retry_codes.get(codes_name).ok_or_else(|| {
                GaxError::Config(format!("{}: unknown retry_codes_name {}", name, codes_name))
            })?;
            let backoff = match &method.retry_params_name {
                Some(params_name) => retry_params
                    .get(params_name)
                    .ok_or_else(|| {
                        GaxError::Config(format!(
                            "{}: unknown retry_params_name {}",
                            name, params_name
                        ))
                    })?
                    .to_backoff(),
                None => BackoffSettings::default(),
            };
            call.retry = Some(RetryOptions::new(parse_codes(codes)?, backoff));
        }

        call.bundle = method.bundling.as_ref().map(BundlingConfig::to_options);
        call.validate()
            .map_err(|e| GaxError::Config(format!("{}: {}", name, e)))?;
        settings.insert(name, call);
    }
    Ok(settings)
}
