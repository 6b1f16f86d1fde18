use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Broad failure classes callers branch on for recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The server returned a failure status.
    Http,
    /// A deadline elapsed or a cancellation token fired.
    Timeout,
    /// The transport failed for any other reason, or retries were exhausted.
    Network,
    /// A payload failed contract checks, or a caller passed mismatched identifiers.
    Validation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Http => "http",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed error for all SDK operations.
///
/// `retriable` is derived once at classification time; the retry loop and
/// callers rely on the flag instead of re-inspecting the error. `Clone` is
/// required because a failed realtime channel replays its terminal error to
/// every subsequent pull.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct PhoenixError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub retriable: bool,
    pub correlation_id: Option<String>,
    pub details: Option<Value>,
}

impl PhoenixError {
    fn new(kind: ErrorKind, message: impl Into<String>, retriable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
            retriable,
            correlation_id: None,
            details: None,
        }
    }

    pub fn http(message: impl Into<String>, status: u16, retriable: bool) -> Self {
        let mut error = Self::new(ErrorKind::Http, message, retriable);
        error.status = Some(status);
        error
    }

    pub fn timeout(message: impl Into<String>, retriable: bool) -> Self {
        Self::new(ErrorKind::Timeout, message, retriable)
    }

    pub fn network(message: impl Into<String>, retriable: bool) -> Self {
        Self::new(ErrorKind::Network, message, retriable)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, false)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Http && self.status == Some(409)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_carries_status_and_retriability() {
        let error = PhoenixError::http("HTTP 503 for POST /session/delta", 503, true)
            .with_correlation_id("corr-1");
        assert_eq!(error.kind, ErrorKind::Http);
        assert_eq!(error.status, Some(503));
        assert!(error.retriable);
        assert_eq!(error.correlation_id.as_deref(), Some("corr-1"));
    }

    #[test]
    fn validation_errors_are_never_retriable() {
        let error = PhoenixError::validation("bad payload");
        assert!(!error.retriable);
        assert_eq!(error.kind, ErrorKind::Validation);
    }

    #[test]
    fn conflict_detection_requires_http_409() {
        assert!(PhoenixError::http("conflict", 409, false).is_conflict());
        assert!(!PhoenixError::http("server error", 500, true).is_conflict());
        assert!(!PhoenixError::network("refused", false).is_conflict());
    }

    #[test]
    fn display_includes_kind() {
        let error = PhoenixError::timeout("request timed out", true);
        assert_eq!(error.to_string(), "timeout error: request timed out");
    }
}
