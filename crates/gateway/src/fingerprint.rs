//! Request fingerprints
//!
//! A fingerprint is the canonical form of (endpoint, normalized params). Two
//! requests with the same fingerprint are the same spend, so the fingerprint
//! keys the response cache.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use upstream::UpstreamRequest;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    canonical: String,
}

impl Fingerprint {
    pub fn new(request: &UpstreamRequest) -> Self {
        let mut canonical = normalize_endpoint(&request.endpoint);
        canonical.push('?');
        let mut first = true;
        for (k, v) in request.params.iter() {
            if !first {
                canonical.push('&');
            }
            // JSON string encoding keeps '&' and '=' inside values unambiguous
            canonical.push_str(&Value::String(k.to_string()).to_string());
            canonical.push('=');
            canonical.push_str(&Value::String(v.to_string()).to_string());
            first = false;
        }
        Self { canonical }
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Fixed-length key for the cache backing store.
    pub fn cache_key(&self) -> String {
        format!("gw:{:x}", Sha256::digest(self.canonical.as_bytes()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_matches('/');
    format!("/{trimmed}")
}
