//! Service-specific error types

use thiserror::Error;

/// Sink errors.
///
/// Gateway and configuration failures carry their own error types and are
/// wrapped with context in `main`; argument errors are reported by clap.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to open output {path}: {source}")]
    SinkOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
