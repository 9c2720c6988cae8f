//! Response cache
//!
//! Successful upstream responses are cached by request fingerprint. The
//! backing store is pluggable and best effort: a store error or a corrupt
//! entry is logged and treated as a miss, a failed write is logged and
//! dropped. The cache never fails a request.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::fingerprint::Fingerprint;
use crate::metrics;

/// Backing store failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cache store error: {0}")]
pub struct CacheError(pub String);

/// Boxed future returned by `CacheStore` methods.
pub type StoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// String key/value store with per-entry TTL.
pub trait CacheStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> StoreFuture<'a, ()>;
}

/// Cached payload and the TTL it was written with.
#[derive(Clone)]
struct Entry {
    value: Arc<str>,
    ttl: Duration,
}

/// Expires each entry after its own TTL, restarting the clock on overwrite.
struct EntryTtl;

impl moka::Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: std::time::Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process store bounded by the total size of keys and payloads in bytes.
pub struct MemoryStore {
    entries: moka::future::Cache<String, Entry>,
}

impl MemoryStore {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: moka::future::Cache::builder()
                .weigher(|key: &String, entry: &Entry| -> u32 {
                    u32::try_from(key.len() + entry.value.len()).unwrap_or(u32::MAX)
                })
                .max_capacity(max_bytes)
                .expire_after(EntryTtl)
                .build(),
        }
    }

    /// Apply pending evictions and expirations now.
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }

    /// Approximate bytes held, as of the last maintenance run.
    pub fn weighted_size(&self) -> u64 {
        self.entries.weighted_size()
    }
}

impl CacheStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.entries.get(key).await.map(|e| e.value.to_string())) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let entry = Entry {
                value: value.into(),
                ttl,
            };
            self.entries.insert(key.to_string(), entry).await;
            Ok(())
        })
    }
}

/// Fingerprint-keyed JSON cache over a `CacheStore`.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ResponseCache {
    /// A zero `ttl` disables caching.
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Moka-backed cache holding at most `max_bytes` of responses.
    pub fn in_memory(max_bytes: u64, ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryStore::new(max_bytes)), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Value> {
        if self.ttl.is_zero() {
            return None;
        }
        let key = fingerprint.cache_key();
        let hit = match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "discarding unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "cache lookup failed, treating as miss");
                None
            }
        };
        let counter = if hit.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache(hit.is_some());
        hit
    }

    pub async fn put(&self, fingerprint: &Fingerprint, value: &Value) {
        if self.ttl.is_zero() {
            return;
        }
        let key = fingerprint.cache_key();
        if let Err(e) = self.store.set(&key, value.to_string(), self.ttl).await {
            warn!(key = %key, error = %e, "cache write failed");
            return;
        }
        debug!(key = %key, "response cached");
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> Value {
        serde_json::json!({
            "ttl_secs": self.ttl.as_secs(),
            "hits": self.hits(),
            "misses": self.misses(),
        })
    }
}
