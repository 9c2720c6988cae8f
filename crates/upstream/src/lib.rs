//! Upstream API abstraction
//!
//! Defines the `Upstream` trait that decouples the request executor from the
//! transport. `HttpUpstream` is the reqwest-backed implementation used in
//! production; tests substitute scripted in-process upstreams.
//!
//! Every call carries its credential explicitly. Implementations must never
//! keep a "current" credential of their own, so that concurrent calls using
//! different credentials cannot race on shared state.

pub mod classify;
pub mod error;
pub mod http;

pub use classify::{classify_status, parse_retry_after};
pub use error::{ErrorKind, UpstreamError};
pub use http::HttpUpstream;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Result alias for upstream calls.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Boxed future returned by `Upstream::call`.
pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'a>>;

/// Normalized query parameters.
///
/// Keys are kept sorted so that two logically identical requests always
/// produce the same fingerprint. Values are trimmed and empty values are
/// dropped on insert; keys are trimmed but kept even when empty so request
/// validation can reject them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a parameter, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into().trim().to_string();
        let value = value.to_string().trim().to_string();
        if value.is_empty() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str("&")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

/// A single logical GET against the upstream API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    /// Path relative to the upstream base URL, e.g. `/v1/cases`
    pub endpoint: String,
    pub params: Params,
}

impl UpstreamRequest {
    pub fn new(endpoint: impl Into<String>, params: Params) -> Self {
        Self {
            endpoint: endpoint.into(),
            params,
        }
    }
}

/// Transport for the upstream API.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Upstream>`).
pub trait Upstream: Send + Sync {
    /// Identifier for logging (e.g. "http")
    fn id(&self) -> &str;

    /// Dispatch one request with the given credential attached.
    ///
    /// Non-2xx responses and transport failures come back as a classified
    /// `UpstreamError`; the caller decides whether to retry or rotate.
    fn call<'a>(&'a self, request: &'a UpstreamRequest, credential: &'a str) -> CallFuture<'a>;
}
