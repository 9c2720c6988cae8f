//! Error types for pool operations

/// Errors from pool construction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential pool is empty: configure at least one API key")]
    Empty,

    #[error("unknown rotation strategy: {0} (expected \"sticky\" or \"round_robin\")")]
    UnknownStrategy(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
