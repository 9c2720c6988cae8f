//! Caller-facing errors

use upstream::{ErrorKind, Params, UpstreamError};

/// Errors returned by `fetch`.
///
/// `kind()` exposes the classification callers switch on; the upstream
/// variant also carries the endpoint, parameters and last upstream response
/// for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("gateway is shutting down")]
    Closed,

    #[error("{endpoint} [{params}] failed after {attempts} attempt(s): {source}")]
    Upstream {
        endpoint: String,
        params: Params,
        attempts: u32,
        #[source]
        source: UpstreamError,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Closed => ErrorKind::Unknown,
            Error::Upstream { source, .. } => source.kind,
        }
    }

    /// Last upstream response, when the failure came from the upstream.
    pub fn last_response(&self) -> Option<&UpstreamError> {
        match self {
            Error::Upstream { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
