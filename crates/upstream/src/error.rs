//! Classified upstream failures

use std::time::Duration;

/// Upper bound on how much of an error body is kept for diagnostics.
const MAX_BODY_CHARS: usize = 512;

/// Classification of an upstream failure, used by the executor to pick
/// between retry, credential rotation and failing fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is malformed (caught before dispatch, or 400/422)
    Validation,
    /// 429, optionally with the server-provided `Retry-After`
    RateLimited { retry_after: Option<Duration> },
    /// 401/403: the credential is unusable
    Auth,
    /// 404
    NotFound,
    /// 5xx
    Server { status: u16 },
    /// Connection failures, timeouts, 408, truncated bodies
    Network,
    /// Anything else: unclassified statuses, unreadable 2xx bodies.
    /// Retried with the same backoff as `Network`.
    Unknown,
}

impl ErrorKind {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimited { .. } => "rate_limited",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Server { .. } => "server",
            ErrorKind::Network => "network",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether repeating the same call on the same credential can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited { .. }
                | ErrorKind::Server { .. }
                | ErrorKind::Network
                | ErrorKind::Unknown
        )
    }
}

/// A failed upstream call with enough context to diagnose it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} error: {message}", .kind.label())]
pub struct UpstreamError {
    pub kind: ErrorKind,
    /// HTTP status, absent for transport-level failures
    pub status: Option<u16>,
    /// Response body, truncated
    pub body: String,
    pub message: String,
}

impl UpstreamError {
    /// Build an error from a non-2xx response.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        Self {
            kind: crate::classify_status(status, retry_after),
            status: Some(status),
            body: truncate(body),
            message: format!("upstream returned {status}"),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Network,
            status: None,
            body: String::new(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            status: None,
            body: String::new(),
            message: message.into(),
        }
    }

    /// A 2xx response whose body could not be decoded.
    pub fn invalid_body(status: u16, message: impl Into<String>, body: &str) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            status: Some(status),
            body: truncate(body),
            message: message.into(),
        }
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_BODY_CHARS {
        return body.to_string();
    }
    let mut out: String = body.chars().take(MAX_BODY_CHARS).collect();
    out.push_str("...");
    out
}
