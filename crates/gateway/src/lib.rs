//! Resilient gateway to a rate-limited, multi-credential upstream API
//!
//! Callers see three operations:
//!
//! - `fetch(endpoint, params)`: cached, admission-controlled, spaced per
//!   credential, retried and rotated according to the failure class
//! - `persist(records)`: fire-and-forget, deduplicated, debounced batch writes
//! - `count_all(query)`: exhaustive offset pagination with duplicate and
//!   stuck-page detection
//!
//! All state (credential cursor, in-flight counters, queue) lives on the
//! `Gateway` and the components it owns, so several independently
//! configured gateways can coexist in one process.

pub mod admission;
pub mod cache;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod metrics;
pub mod paginate;
pub mod persist;
pub mod records;
pub mod usage;

#[cfg(test)]
mod testing;

pub use admission::{AdmissionController, AdmissionPermit};
pub use cache::{CacheError, CacheStore, MemoryStore, ResponseCache};
pub use error::{Error, Result};
pub use executor::{Executor, RetryPolicy};
pub use fingerprint::Fingerprint;
pub use paginate::{CountQuery, CountResult, PaginationConfig, PaginationError, Paginator, Progress};
pub use persist::{PersistConfig, PersistError, PersistQueue, PersistSink, PersistStats, SaveFuture};
pub use records::IdentityResolver;
pub use usage::{MetricsUsage, UsageSink};

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use upstream::Params;

pub struct Gateway {
    executor: Arc<Executor>,
    paginator: Paginator,
}

impl Gateway {
    pub fn new(executor: Executor, pagination: PaginationConfig, resolver: IdentityResolver) -> Self {
        let executor = Arc::new(executor);
        let paginator = Paginator::new(executor.clone(), pagination, resolver);
        Self {
            executor,
            paginator,
        }
    }

    pub async fn fetch(&self, endpoint: &str, params: &Params) -> Result<Value> {
        self.executor.fetch(endpoint, params).await
    }

    /// Queue records for durable storage. Returns how many were accepted;
    /// always 0 when no persistence sink is configured.
    pub fn persist(&self, records: Vec<Value>) -> usize {
        match self.executor.persist() {
            Some(queue) => queue.enqueue(records),
            None => {
                warn!(dropped = records.len(), "no persistence sink configured");
                0
            }
        }
    }

    pub async fn count_all(&self, query: &CountQuery) -> std::result::Result<CountResult, PaginationError> {
        self.paginator.count_all(query).await
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn health(&self) -> Value {
        let pool = self.executor.pool().health();
        let status = pool["status"].clone();
        serde_json::json!({
            "status": status,
            "credentials": pool,
            "admission": self.executor.admission().health(),
            "cache": self.executor.cache().health(),
            "persist": self.executor.persist().map(PersistQueue::stats),
        })
    }

    /// Reject new upstream calls, then flush and stop the persistence queue.
    pub async fn shutdown(&self) {
        self.executor.admission().close();
        if let Some(queue) = self.executor.persist() {
            queue.shutdown().await;
        }
        info!("gateway shut down");
    }
}
