//! JSON status bodies carried by HTTP error responses.
//!
//! Servers answer a failed HTTP+JSON call with a body of the form:
//! ```json
//! {
//!   "error": {
//!     "code": 404,
//!     "message": "shelf not found",
//!     "status": "NOT_FOUND",
//!     "details": [{"@type": "type.googleapis.com/google.rpc.ErrorInfo", "reason": "..."}]
//!   }
//! }
//! ```
//! Some servers omit the `error` envelope, and `code` may be either the HTTP
//! status or the RPC code. [`StatusBody`] accepts all of these.

use serde::{Deserialize, Serialize};

use crate::{Code, ErrorDetail, Status};

/// Structured status as it appears on the JSON wire.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct StatusBody {
    /// HTTP status (inside the `error` envelope) or RPC code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Canonical code name such as `"NOT_FOUND"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct Envelope {
    error: StatusBody,
}

impl StatusBody {
    /// Parse a response body, with or without the `error` envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        match serde_json::from_slice::<Envelope>(bytes) {
            Ok(envelope) => Ok(envelope.error),
            Err(_) => serde_json::from_slice::<StatusBody>(bytes),
        }
    }

    /// Resolve the RPC code.
    ///
    /// Preference order: the `status` name, then `code` read as an HTTP status
    /// when `enveloped`, otherwise as an RPC code, then the transport status.
    pub fn code(&self, enveloped: bool, http_status: u16) -> Code {
        if let Some(code) = self.status.as_deref().and_then(|s| s.parse().ok()) {
            return code;
        }
        match self.code {
            Some(n) if enveloped || n >= 100 => {
                u16::try_from(n).map(Code::from_http_status).unwrap_or(Code::Unknown)
            }
            Some(n) => Code::from_i32(n).unwrap_or(Code::Unknown),
            None => Code::from_http_status(http_status),
        }
    }

    /// Convert into a [`Status`], dropping details that carry no `@type`.
    pub fn into_status(self, enveloped: bool, http_status: u16) -> Status {
        let code = self.code(enveloped, http_status);
        let mut status = match self.message {
            Some(message) => Status::new(code, message),
            None => Status::from_code(code),
        };
        for detail in self.details.iter().filter_map(ErrorDetail::from_json) {
            status = status.add_error_detail(detail);
        }
        status
    }
}

/// Parse an HTTP error body into a [`Status`].
///
/// Bodies that are not a JSON status fall back to the HTTP status mapping,
/// using the body text (or the reason phrase) as the message.
pub fn status_from_http_body(http_status: u16, bytes: &[u8]) -> Status {
    let enveloped = serde_json::from_slice::<Envelope>(bytes).is_ok();
    match StatusBody::from_slice(bytes) {
        Ok(body) if body.code.is_some() || body.status.is_some() || body.message.is_some() => {
            body.into_status(enveloped, http_status)
        }
        _ => {
            let code = Code::from_http_status(http_status);
            let message = match std::str::from_utf8(bytes) {
                Ok(text) if !text.trim().is_empty() => text.to_string(),
                _ => http::StatusCode::from_u16(http_status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("unknown error")
                    .to_string(),
            };
            Status::new(code, message)
        }
    }
}
