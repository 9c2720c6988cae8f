//! Credential pool for the upstream API
//!
//! Holds the configured API keys, decides which key a logical call starts
//! on, and enforces a minimum spacing between dispatches on each key.
//!
//! Selection strategies:
//! - `sticky`: every call starts on the pool's current key; the current key
//!   only moves when the executor rotates away from it after a failure
//! - `round_robin`: successive calls start on successive keys
//!
//! Spacing is tracked per key, so N keys allow up to N times the throughput
//! of a single shared limiter.

pub mod error;
pub mod pool;
pub mod rate_limit;

pub use error::{Error, Result};
pub use pool::{CredentialPool, RotationStrategy};
pub use rate_limit::SpacingLimiter;
