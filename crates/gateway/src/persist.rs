//! Debounced, deduplicated persistence queue
//!
//! Fetched records are queued in memory and written to a `PersistSink` in
//! fixed-size batches by a single background task. The first enqueue into an
//! empty queue arms a debounce timer; later enqueues join the pending flush
//! without extending it. Records enqueued while a flush is running re-arm the
//! timer once that flush has drained the queue.
//!
//! Persistence is best effort. The queue is bounded (oldest entries are
//! evicted), batch failures are logged and dropped, and nothing is ever
//! reported back to the caller that enqueued the records.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::records::IdentityResolver;

/// A batch write failure. Logged by the queue, never surfaced.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("write failed: {0}")]
    Write(String),

    #[error("batch rejected: {0}")]
    Rejected(String),
}

/// Boxed future returned by `PersistSink::save_batch`.
pub type SaveFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<String>, PersistError>> + Send + 'a>>;

/// Durable store for fetched records.
pub trait PersistSink: Send + Sync {
    /// Write one batch, returning the ids of the stored records.
    fn save_batch<'a>(&'a self, records: &'a [Value]) -> SaveFuture<'a>;
}

#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_queue: usize,
    pub debounce: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 10,
            max_queue: 5000,
            debounce: Duration::from_millis(250),
        }
    }
}

/// Queue counters for the health report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    /// Entries currently waiting for a flush
    pub queued: usize,
    pub enqueued: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub flushed: u64,
    pub failed_batches: u64,
    pub flushes: u64,
}

struct Pending {
    key: String,
    record: Value,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Pending>,
    /// Keys of queued entries and of batches not yet dispatched
    seen: HashSet<String>,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    duplicates: AtomicU64,
    evicted: AtomicU64,
    flushed: AtomicU64,
    failed_batches: AtomicU64,
    flushes: AtomicU64,
}

struct Shared {
    state: Mutex<QueueState>,
    trigger: Notify,
    shutdown: Notify,
    config: PersistConfig,
    resolver: IdentityResolver,
    counters: Counters,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the queue and its flush task. Clones share the same queue.
#[derive(Clone)]
pub struct PersistQueue {
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PersistQueue {
    /// Start the flush task. Must be called from within a tokio runtime.
    pub fn spawn(
        sink: Arc<dyn PersistSink>,
        resolver: IdentityResolver,
        mut config: PersistConfig,
    ) -> Self {
        config.batch_size = config.batch_size.max(1);
        config.concurrency = config.concurrency.max(1);
        config.max_queue = config.max_queue.max(1);

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            trigger: Notify::new(),
            shutdown: Notify::new(),
            config,
            resolver,
            counters: Counters::default(),
        });
        let handle = tokio::spawn(run(shared.clone(), sink));
        Self {
            shared,
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Queue records for persistence. Never blocks.
    ///
    /// Returns the number of records accepted; records whose identity is
    /// already queued are skipped. After `shutdown` nothing is accepted.
    pub fn enqueue(&self, records: Vec<Value>) -> usize {
        if records.is_empty() {
            return 0;
        }
        let shared = &self.shared;
        let max_queue = shared.config.max_queue;
        let mut accepted = 0usize;
        let mut duplicates = 0usize;
        let mut evicted = 0usize;

        let arm = {
            let mut state = shared.lock();
            if state.closed {
                warn!(dropped = records.len(), "persist queue closed, dropping records");
                return 0;
            }
            let was_empty = state.entries.is_empty();
            for record in records {
                let key = shared.resolver.identity(&record);
                if !state.seen.insert(key.clone()) {
                    duplicates += 1;
                    continue;
                }
                state.entries.push_back(Pending { key, record });
                accepted += 1;
                while state.entries.len() > max_queue {
                    if let Some(oldest) = state.entries.pop_front() {
                        state.seen.remove(&oldest.key);
                        evicted += 1;
                    }
                }
            }
            was_empty && accepted > 0
        };

        let counters = &shared.counters;
        counters.enqueued.fetch_add(accepted as u64, Ordering::Relaxed);
        counters.duplicates.fetch_add(duplicates as u64, Ordering::Relaxed);
        counters.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        metrics::record_persisted("queued", accepted);
        metrics::record_persisted("duplicate", duplicates);
        if evicted > 0 {
            warn!(evicted, max_queue, "persist queue full, evicted oldest records");
            metrics::record_evicted(evicted);
        }
        if arm {
            shared.trigger.notify_one();
        }
        accepted
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PersistStats {
        let c = &self.shared.counters;
        PersistStats {
            queued: self.len(),
            enqueued: c.enqueued.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
            flushed: c.flushed.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting records, flush what is queued and wait for the flush
    /// task to exit. Later calls return immediately.
    pub async fn shutdown(&self) {
        self.shared.lock().closed = true;
        self.shared.trigger.notify_one();
        self.shared.shutdown.notify_one();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "persist flush task ended abnormally");
            }
            info!(stats = ?self.stats(), "persist queue shut down");
        }
    }
}

async fn run(shared: Arc<Shared>, sink: Arc<dyn PersistSink>) {
    loop {
        shared.trigger.notified().await;
        if !shared.lock().closed {
            tokio::select! {
                _ = tokio::time::sleep(shared.config.debounce) => {}
                _ = shared.shutdown.notified() => {}
            }
        }
        flush(&shared, sink.as_ref()).await;
        if shared.lock().closed {
            break;
        }
    }
    // Anything queued while the last flush ran
    flush(&shared, sink.as_ref()).await;
}

async fn flush(shared: &Shared, sink: &dyn PersistSink) {
    let drained: Vec<Pending> = shared.lock().entries.drain(..).collect();
    if drained.is_empty() {
        return;
    }
    shared.counters.flushes.fetch_add(1, Ordering::Relaxed);

    let batch_size = shared.config.batch_size;
    let mut batches = Vec::with_capacity(drained.len().div_ceil(batch_size));
    let mut drained = drained.into_iter().peekable();
    while drained.peek().is_some() {
        batches.push(drained.by_ref().take(batch_size).collect::<Vec<_>>());
    }
    debug!(
        records = batches.iter().map(Vec::len).sum::<usize>(),
        batches = batches.len(),
        "flushing persist queue"
    );

    futures_util::stream::iter(batches)
        .for_each_concurrent(shared.config.concurrency, |batch| async move {
            let (keys, records): (Vec<String>, Vec<Value>) =
                batch.into_iter().map(|p| (p.key, p.record)).unzip();
            {
                let mut state = shared.lock();
                for key in &keys {
                    state.seen.remove(key);
                }
            }
            match sink.save_batch(&records).await {
                Ok(ids) => {
                    shared
                        .counters
                        .flushed
                        .fetch_add(records.len() as u64, Ordering::Relaxed);
                    metrics::record_persisted("written", records.len());
                    debug!(records = records.len(), stored = ids.len(), "batch persisted");
                }
                Err(e) => {
                    shared.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                    metrics::record_persisted("failed", records.len());
                    warn!(records = records.len(), error = %e, "batch persist failed, dropping");
                }
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, rows};
    use serde_json::json;

    fn queue(sink: Arc<RecordingSink>, config: PersistConfig) -> PersistQueue {
        PersistQueue::spawn(sink, IdentityResolver::default(), config)
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_after_debounce_in_batches() {
        let sink = Arc::new(RecordingSink::new());
        let queue = queue(sink.clone(), PersistConfig::default());

        assert_eq!(queue.enqueue(rows(0..120)), 120);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.records_written(), 0, "flushed before debounce elapsed");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let sizes: Vec<usize> = sink.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 120);
        assert!(sizes.iter().all(|&n| n <= 50), "batch sizes {sizes:?}");
        assert_eq!(sizes.len(), 3);
        assert_eq!(queue.stats().flushes, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn later_enqueues_do_not_extend_debounce() {
        let sink = Arc::new(RecordingSink::new());
        let queue = queue(sink.clone(), PersistConfig::default());

        queue.enqueue(rows(0..1));
        tokio::time::sleep(Duration::from_millis(200)).await;
        queue.enqueue(rows(1..2));
        tokio::time::sleep(Duration::from_millis(60)).await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 1, "both records coalesced into one flush");
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_identity_is_queued_once() {
        let sink = Arc::new(RecordingSink::new());
        let queue = queue(sink.clone(), PersistConfig::default());

        assert_eq!(queue.enqueue(vec![json!({"id": 7, "v": 1})]), 1);
        assert_eq!(queue.enqueue(vec![json!({"id": 7, "v": 2})]), 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().duplicates, 1);

        queue.shutdown().await;
        assert_eq!(sink.records_written(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_evicts_oldest_before_flush() {
        let sink = Arc::new(RecordingSink::new());
        let queue = queue(sink.clone(), PersistConfig::default());

        assert_eq!(queue.enqueue(rows(0..6000)), 6000);
        assert_eq!(queue.len(), 5000);
        assert_eq!(queue.stats().evicted, 1000);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 100);
        assert!(batches.iter().all(|b| b.len() == 50));
        let lowest = batches
            .iter()
            .flatten()
            .filter_map(|r| r["id"].as_u64())
            .min();
        assert_eq!(lowest, Some(1000), "earliest records evicted");
        assert_eq!(queue.stats().flushed, 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn evicted_identity_can_be_queued_again() {
        let sink = Arc::new(RecordingSink::new());
        let config = PersistConfig {
            max_queue: 2,
            ..PersistConfig::default()
        };
        let queue = queue(sink.clone(), config);

        queue.enqueue(rows(0..3));
        assert_eq!(queue.enqueue(rows(0..1)), 1, "id 0 was evicted and released");
    }

    #[tokio::test(start_paused = true)]
    async fn batch_writes_are_bounded() {
        let sink = Arc::new(RecordingSink::new().with_latency(Duration::from_millis(50)));
        let config = PersistConfig {
            batch_size: 10,
            concurrency: 3,
            ..PersistConfig::default()
        };
        let queue = queue(sink.clone(), config);

        queue.enqueue(rows(0..100));
        queue.shutdown().await;
        assert_eq!(sink.records_written(), 100);
        assert_eq!(sink.peak(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_released_when_batch_is_dispatched() {
        let sink = Arc::new(RecordingSink::new().with_latency(Duration::from_millis(100)));
        let queue = queue(sink.clone(), PersistConfig::default());

        queue.enqueue(rows(0..1));
        // Flush starts at 250ms and the write is still running at 260ms
        tokio::time::sleep(Duration::from_millis(260)).await;
        assert_eq!(sink.records_written(), 0);
        assert_eq!(queue.enqueue(rows(0..1)), 1);

        queue.shutdown().await;
        assert_eq!(sink.records_written(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_during_flush_rearms_timer() {
        let sink = Arc::new(RecordingSink::new().with_latency(Duration::from_millis(100)));
        let queue = queue(sink.clone(), PersistConfig::default());

        queue.enqueue(rows(0..1));
        tokio::time::sleep(Duration::from_millis(300)).await;
        queue.enqueue(rows(1..2));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(sink.batches().len(), 2);
        assert_eq!(queue.stats().flushes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batches_are_dropped_silently() {
        let sink = Arc::new(RecordingSink::new());
        sink.set_failing(true);
        let queue = queue(sink.clone(), PersistConfig::default());

        queue.enqueue(rows(0..60));
        tokio::time::sleep(Duration::from_millis(300)).await;
        let stats = queue.stats();
        assert_eq!(stats.failed_batches, 2);
        assert_eq!(stats.flushed, 0);
        assert!(queue.is_empty(), "failed records are not requeued");

        sink.set_failing(false);
        queue.enqueue(rows(0..1));
        queue.shutdown().await;
        assert_eq!(sink.records_written(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_without_waiting_for_debounce() {
        let sink = Arc::new(RecordingSink::new());
        let queue = queue(sink.clone(), PersistConfig::default());

        queue.enqueue(rows(0..5));
        let start = tokio::time::Instant::now();
        queue.shutdown().await;
        assert!(tokio::time::Instant::now() - start < Duration::from_millis(250));
        assert_eq!(sink.records_written(), 5);

        assert_eq!(queue.enqueue(rows(5..6)), 0);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_of_idle_queue_returns() {
        let sink = Arc::new(RecordingSink::new());
        let queue = queue(sink.clone(), PersistConfig::default());
        queue.shutdown().await;
        assert_eq!(sink.batches().len(), 0);
    }
}
