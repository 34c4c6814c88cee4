//! Call runtime error types.
//!
//! This module provides [`GaxError`], the error surfaced by every wrapped call.

use http::HeaderMap;
use rpc_gax_core::{Code, ErrorDetail, Status};

use crate::config::RetryCodes;

/// Errors surfaced by wrapped calls.
///
/// Every failure reaches the caller through the call's completion channel
/// (awaited result, callback, or stream error event); none are swallowed.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GaxError {
    /// A status from the transport or synthesized by the runtime
    /// (deadline exceeded, cancelled).
    #[error("{code}: {}", .message.as_deref().unwrap_or("(no message)"))]
    Status {
        code: Code,
        message: Option<String>,
        details: Vec<ErrorDetail>,
        /// Response metadata (headers or trailers) that came with the failure.
        metadata: HeaderMap,
    },

    /// Transport-level error (connection refused, reset, etc.).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request could not be serialized or transcoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The response could not be deserialized.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid settings, descriptors or client configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GaxError {
    /// Create a new status error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        GaxError::Status {
            code,
            message: Some(message.into()),
            details: vec![],
            metadata: HeaderMap::new(),
        }
    }

    /// Create a new status error with just a code.
    pub fn from_code(code: Code) -> Self {
        GaxError::Status {
            code,
            message: None,
            details: vec![],
            metadata: HeaderMap::new(),
        }
    }

    /// Get the error code.
    ///
    /// For non-Status variants, returns an appropriate code:
    /// - Transport: `Unavailable`
    /// - Encode/Decode: `Internal`
    /// - Config: `InvalidArgument`
    pub fn code(&self) -> Code {
        match self {
            GaxError::Status { code, .. } => *code,
            GaxError::Transport(_) => Code::Unavailable,
            GaxError::Encode(_) | GaxError::Decode(_) => Code::Internal,
            GaxError::Config(_) => Code::InvalidArgument,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> Option<&str> {
        match self {
            GaxError::Status { message, .. } => message.as_deref(),
            GaxError::Transport(msg)
            | GaxError::Encode(msg)
            | GaxError::Decode(msg)
            | GaxError::Config(msg) => Some(msg),
        }
    }

    /// Get the error details (only for Status variant).
    pub fn details(&self) -> &[ErrorDetail] {
        match self {
            GaxError::Status { details, .. } => details,
            _ => &[],
        }
    }

    /// Get the metadata attached to the failure, if any.
    pub fn metadata(&self) -> Option<&HeaderMap> {
        match self {
            GaxError::Status { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    /// Attach response metadata to a status error.
    pub fn with_metadata(mut self, headers: HeaderMap) -> Self {
        if let GaxError::Status { metadata, .. } = &mut self {
            *metadata = headers;
        }
        self
    }

    /// Whether the runtime may retry this error under the given codes.
    ///
    /// Encode and configuration errors are never retried, whatever their
    /// mapped code.
    pub fn is_retryable_in(&self, codes: &RetryCodes) -> bool {
        match self {
            GaxError::Encode(_) | GaxError::Config(_) => false,
            other => codes.contains(other.code()),
        }
    }

    /// Whether this error is the result of an explicit cancel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GaxError::Status { code: Code::Canceled, .. })
    }

    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }
}

impl From<Status> for GaxError {
    fn from(status: Status) -> Self {
        let (code, message, details) = status.into_parts();
        GaxError::Status {
            code,
            message,
            details,
            metadata: HeaderMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gax_error_new() {
        let err = GaxError::new(Code::NotFound, "resource not found");
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), Some("resource not found"));
        assert!(err.details().is_empty());
        assert_eq!(err.to_string(), "NOT_FOUND: resource not found");
    }

    #[test]
    fn test_gax_error_variants_code() {
        assert_eq!(GaxError::Transport("reset".into()).code(), Code::Unavailable);
        assert_eq!(GaxError::Encode("bad".into()).code(), Code::Internal);
        assert_eq!(GaxError::Decode("bad".into()).code(), Code::Internal);
        assert_eq!(GaxError::Config("bad".into()).code(), Code::InvalidArgument);
    }

    #[test]
    fn test_gax_error_is_retryable_in() {
        let codes = RetryCodes::new([Code::Unavailable, Code::Internal]);

        assert!(GaxError::unavailable("down").is_retryable_in(&codes));
        assert!(GaxError::Transport("reset".into()).is_retryable_in(&codes));
        assert!(GaxError::Decode("garbage".into()).is_retryable_in(&codes));
        assert!(!GaxError::not_found("missing").is_retryable_in(&codes));

        // Encode errors map to Internal but are terminal regardless.
        assert!(!GaxError::Encode("no rule".into()).is_retryable_in(&codes));
    }

    #[test]
    fn test_gax_error_from_status() {
        let status = Status::unavailable("busy");
        let err = GaxError::from(status);
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(err.message(), Some("busy"));
    }

    #[test]
    fn test_gax_error_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "abc".parse().unwrap());
        let err = GaxError::internal("boom").with_metadata(headers);
        assert_eq!(err.metadata().unwrap().get("x-request-id").unwrap(), "abc");

        assert!(GaxError::Transport("x".into()).metadata().is_none());
    }

    #[test]
    fn test_gax_error_is_cancelled() {
        assert!(GaxError::cancelled("stop").is_cancelled());
        assert!(!GaxError::deadline_exceeded("late").is_cancelled());
    }
}
