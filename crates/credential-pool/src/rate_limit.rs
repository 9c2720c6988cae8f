//! Per-credential dispatch spacing
//!
//! Each credential has a "last dispatch" stamp. A caller reserves the next
//! free slot (`max(now, last + min_interval)`) inside a short critical
//! section, stamps it, and only then sleeps until the slot arrives. Because
//! the stamp is taken before sleeping, concurrent callers on the same
//! credential each get their own slot and stay at least `min_interval` apart.
//! Dispatch order among them is not guaranteed to match call order.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Minimum-interval limiter with one slot per credential.
#[derive(Debug)]
pub struct SpacingLimiter {
    min_interval: Duration,
    last: Mutex<Vec<Option<Instant>>>,
}

impl SpacingLimiter {
    pub fn new(credentials: usize, min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(vec![None; credentials]),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Reserve the next dispatch slot for `index` and return when it starts.
    ///
    /// Never suspends.
    pub fn reserve(&self, index: usize) -> Instant {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = match last[index] {
            Some(prev) => (prev + self.min_interval).max(now),
            None => now,
        };
        last[index] = Some(slot);
        slot
    }

    /// Suspend until `index` may dispatch again, then return.
    pub async fn wait(&self, index: usize) {
        let slot = self.reserve(index);
        if slot > Instant::now() {
            tokio::time::sleep_until(slot).await;
        }
    }

    /// Most recent reserved slot for `index`, if it was ever used.
    pub fn last_dispatch(&self, index: usize) -> Option<Instant> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.get(index).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_dispatch_is_immediate() {
        let limiter = SpacingLimiter::new(1, Duration::from_millis(200));
        let start = Instant::now();
        limiter.wait(0).await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_dispatches_are_spaced() {
        let limiter = SpacingLimiter::new(1, Duration::from_millis(200));
        let start = Instant::now();
        limiter.wait(0).await;
        limiter.wait(0).await;
        limiter.wait(0).await;
        assert_eq!(Instant::now() - start, Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_get_distinct_slots() {
        let limiter = Arc::new(SpacingLimiter::new(1, Duration::from_millis(200)));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait(0).await;
                Instant::now()
            }));
        }
        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();
        for pair in stamps.windows(2) {
            assert!(
                pair[1] - pair[0] >= Duration::from_millis(200),
                "dispatches {:?} apart",
                pair[1] - pair[0]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_are_limited_independently() {
        let limiter = SpacingLimiter::new(2, Duration::from_millis(200));
        let start = Instant::now();
        limiter.wait(0).await;
        limiter.wait(1).await;
        assert_eq!(Instant::now(), start, "second credential must not wait");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_credential_does_not_wait() {
        let limiter = SpacingLimiter::new(1, Duration::from_millis(200));
        limiter.wait(0).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        let before = Instant::now();
        limiter.wait(0).await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_never_waits() {
        let limiter = SpacingLimiter::new(1, Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.wait(0).await;
        }
        assert_eq!(Instant::now(), start);
    }

    #[test]
    fn last_dispatch_tracks_reservations() {
        let limiter = SpacingLimiter::new(2, Duration::from_millis(200));
        assert!(limiter.last_dispatch(0).is_none());
        let slot = limiter.reserve(0);
        assert_eq!(limiter.last_dispatch(0), Some(slot));
        assert!(limiter.last_dispatch(1).is_none());
    }
}
