//! Concurrency admission
//!
//! Caps the number of upstream calls in flight across the whole gateway.
//! Waiters queue on a tokio `Semaphore`, which is fair: permits are handed
//! out in the order `acquire` was called. The returned permit releases its
//! slot on drop, so every exit path of a dispatch (including a cancelled
//! future) gives the slot back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::metrics;

struct Inner {
    semaphore: Option<Arc<Semaphore>>,
    limit: Option<usize>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    admitted: AtomicU64,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl AdmissionController {
    /// `None` or `Some(0)` admits everything immediately.
    pub fn new(max_concurrency: Option<usize>) -> Self {
        let limit = max_concurrency.filter(|&n| n > 0);
        Self {
            inner: Arc::new(Inner {
                semaphore: limit.map(|n| Arc::new(Semaphore::new(n))),
                limit,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                admitted: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Wait for a slot.
    ///
    /// Fails with `Error::Closed` once `close` has been called, including
    /// for callers already waiting.
    pub async fn acquire(&self) -> Result<AdmissionPermit> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let permit = match &self.inner.semaphore {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Closed)?,
            ),
            None => None,
        };
        let now = self.inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak.fetch_max(now, Ordering::AcqRel);
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
        metrics::set_in_flight(now);
        Ok(AdmissionPermit {
            inner: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Reject all pending and future acquisitions. Held permits stay valid.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(semaphore) = &self.inner.semaphore {
            semaphore.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> Option<usize> {
        self.inner.limit
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight count observed since startup.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::Acquire)
    }

    pub fn admitted(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> serde_json::Value {
        serde_json::json!({
            "max_concurrency": self.limit(),
            "in_flight": self.in_flight(),
            "peak_in_flight": self.peak(),
            "admitted": self.admitted(),
            "closed": self.is_closed(),
        })
    }
}

/// One admitted call. Dropping it frees the slot.
pub struct AdmissionPermit {
    inner: Arc<Inner>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let now = self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::set_in_flight(now);
    }
}
