//! Credential selection and rotation
//!
//! The pool owns the API keys and their dispatch spacing. It never hands out
//! a shared "default" key: callers ask for an index, wait for that index's
//! slot, and attach the key to their own request.
//!
//! Under the sticky strategy the pool keeps a current index. A rotation away
//! from the current index moves it forward by one; rotations reported for a
//! stale index (another call already rotated) are ignored so that a burst of
//! concurrent auth failures advances the current key only once.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use common::Secret;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use upstream::ErrorKind;

use crate::error::{Error, Result};
use crate::rate_limit::SpacingLimiter;

/// How a logical call picks its starting credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// Prefer the current credential, rotate only on failure
    #[default]
    Sticky,
    /// Cycle through all credentials, one per logical call
    RoundRobin,
}

impl RotationStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            RotationStrategy::Sticky => "sticky",
            RotationStrategy::RoundRobin => "round_robin",
        }
    }
}

impl FromStr for RotationStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sticky" => Ok(RotationStrategy::Sticky),
            "round_robin" | "round-robin" | "roundrobin" => Ok(RotationStrategy::RoundRobin),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// Per-credential counters for the health report.
#[derive(Debug, Default)]
struct CredentialStats {
    dispatches: AtomicU64,
    successes: AtomicU64,
    auth_failures: AtomicU64,
    rate_limited: AtomicU64,
    other_failures: AtomicU64,
}

/// Pool of upstream API credentials.
pub struct CredentialPool {
    credentials: Vec<Secret<String>>,
    strategy: RotationStrategy,
    /// Sticky strategy: the preferred credential
    current: AtomicUsize,
    /// Round-robin strategy: next starting credential
    next_index: AtomicUsize,
    rotations: AtomicU64,
    limiter: SpacingLimiter,
    stats: Vec<CredentialStats>,
}

impl CredentialPool {
    /// Create a pool over `credentials`.
    ///
    /// Returns `Error::Empty` when no credentials are given.
    pub fn new(
        credentials: Vec<Secret<String>>,
        strategy: RotationStrategy,
        min_interval: Duration,
    ) -> Result<Self> {
        if credentials.is_empty() {
            return Err(Error::Empty);
        }
        let n = credentials.len();
        info!(
            credentials = n,
            strategy = strategy.label(),
            min_interval_ms = min_interval.as_millis() as u64,
            "credential pool initialized"
        );
        Ok(Self {
            credentials,
            strategy,
            current: AtomicUsize::new(0),
            next_index: AtomicUsize::new(0),
            rotations: AtomicU64::new(0),
            limiter: SpacingLimiter::new(n, min_interval),
            stats: (0..n).map(|_| CredentialStats::default()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Always false: construction rejects empty pools.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn strategy(&self) -> RotationStrategy {
        self.strategy
    }

    /// Starting credential index for a new logical call.
    pub fn next_credential(&self) -> usize {
        let n = self.credentials.len();
        match self.strategy {
            RotationStrategy::Sticky => self.current.load(Ordering::Acquire) % n,
            RotationStrategy::RoundRobin => self.next_index.fetch_add(1, Ordering::Relaxed) % n,
        }
    }

    /// Credential at `index` (wrapping).
    pub fn credential(&self, index: usize) -> &Secret<String> {
        &self.credentials[index % self.credentials.len()]
    }

    /// Suspend until `index` may dispatch, then stamp its last-use time.
    pub async fn wait_for_slot(&self, index: usize) {
        let index = index % self.credentials.len();
        self.limiter.wait(index).await;
        self.stats[index].dispatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that the executor is abandoning `index` for the next credential.
    ///
    /// Returns the index the caller should try next.
    pub fn rotate_from(&self, index: usize) -> usize {
        let n = self.credentials.len();
        let index = index % n;
        let next = (index + 1) % n;
        self.rotations.fetch_add(1, Ordering::Relaxed);
        if self.strategy == RotationStrategy::Sticky {
            match self
                .current
                .compare_exchange(index, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => info!(from = index, to = next, "rotated current credential"),
                Err(actual) => {
                    debug!(from = index, current = actual, "current credential already rotated")
                }
            }
        }
        next
    }

    /// Record a successful dispatch on `index`.
    pub fn report_success(&self, index: usize) {
        let index = index % self.credentials.len();
        self.stats[index].successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a classified failure on `index`.
    pub fn report_error(&self, index: usize, kind: &ErrorKind) {
        let index = index % self.credentials.len();
        let stats = &self.stats[index];
        match kind {
            ErrorKind::Auth => {
                warn!(
                    credential = index,
                    hint = %self.credentials[index].hint(),
                    "credential rejected by upstream"
                );
                stats.auth_failures.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::RateLimited { .. } => {
                stats.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                stats.other_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Total rotations performed since startup.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Dispatches made on `index` since startup.
    pub fn dispatches(&self, index: usize) -> u64 {
        self.stats[index % self.credentials.len()]
            .dispatches
            .load(Ordering::Relaxed)
    }

    /// Pool health summary.
    ///
    /// Status mapping: no auth failures anywhere -> healthy, some credentials
    /// with auth failures -> degraded, every credential with auth failures ->
    /// unhealthy.
    pub fn health(&self) -> serde_json::Value {
        let now = Instant::now();
        let mut accounts = Vec::new();
        let mut failing = 0usize;

        for (index, credential) in self.credentials.iter().enumerate() {
            let stats = &self.stats[index];
            let auth_failures = stats.auth_failures.load(Ordering::Relaxed);
            let successes = stats.successes.load(Ordering::Relaxed);
            if auth_failures > 0 && successes == 0 {
                failing += 1;
            }
            let idle_ms = self
                .limiter
                .last_dispatch(index)
                .map(|t| now.saturating_duration_since(t).as_millis() as u64);
            accounts.push(serde_json::json!({
                "index": index,
                "hint": credential.hint(),
                "dispatches": stats.dispatches.load(Ordering::Relaxed),
                "successes": successes,
                "auth_failures": auth_failures,
                "rate_limited": stats.rate_limited.load(Ordering::Relaxed),
                "other_failures": stats.other_failures.load(Ordering::Relaxed),
                "idle_ms": idle_ms,
            }));
        }

        let total = self.credentials.len();
        let status = if failing == 0 {
            "healthy"
        } else if failing < total {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "strategy": self.strategy.label(),
            "credentials_total": total,
            "current": self.current.load(Ordering::Acquire) % total,
            "rotations": self.rotations(),
            "min_interval_ms": self.limiter.min_interval().as_millis() as u64,
            "credentials": accounts,
        })
    }
}
