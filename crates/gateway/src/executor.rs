//! Resilient request executor
//!
//! One logical `fetch` becomes at most `credentials x max_retries` upstream
//! dispatches. Each dispatch takes an admission slot, waits for its
//! credential's spacing slot and attaches that credential to the request.
//! What happens after a failure is decided by `plan`, purely from the
//! classified error kind and where the call is in its retry budget.

use std::sync::Arc;
use std::time::Duration;

use credential_pool::CredentialPool;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use upstream::{ErrorKind, Params, Upstream, UpstreamError, UpstreamRequest};

use crate::admission::AdmissionController;
use crate::cache::ResponseCache;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::metrics;
use crate::persist::PersistQueue;
use crate::records::page_records;
use crate::usage::{MetricsUsage, UsageSink};

const DEFAULT_CACHE_BYTES: u64 = 32 * 1024 * 1024;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Retry budget and delays.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per credential, including the first
    pub max_retries: u32,
    /// Base wait after a 429 without `Retry-After`
    pub rate_limit_delay: Duration,
    /// Base wait after server, network and single-credential auth failures
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_delay: Duration::from_millis(1000),
            backoff_base: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Wait after a 429 on `attempt` (1-based). A server-provided
    /// `Retry-After` wins over the exponential default.
    pub fn rate_limit_wait(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| exponential(self.rate_limit_delay, attempt))
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        exponential(self.backoff_base, attempt)
    }
}

fn exponential(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << shift)
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Wait, then retry on the same credential
    Retry(Duration),
    /// Abandon this credential and mark it as rotated away from
    Rotate,
    /// This credential's attempts are spent; move on without rotating
    Exhausted,
    /// Give up on the whole call
    Fail,
}

/// Decide the next step after `attempt` (1-based) failed with `kind`.
///
/// `others_remain` is whether the call still has an untried credential.
pub fn plan(policy: &RetryPolicy, kind: ErrorKind, attempt: u32, others_remain: bool) -> Step {
    let attempts_left = attempt < policy.attempts();
    match kind {
        ErrorKind::Validation | ErrorKind::NotFound => Step::Fail,
        ErrorKind::RateLimited { retry_after } => {
            if attempts_left {
                Step::Retry(policy.rate_limit_wait(attempt, retry_after))
            } else if others_remain {
                Step::Rotate
            } else {
                Step::Exhausted
            }
        }
        ErrorKind::Auth => {
            if others_remain {
                Step::Rotate
            } else if attempts_left {
                Step::Retry(policy.backoff(attempt))
            } else {
                Step::Exhausted
            }
        }
        ErrorKind::Server { .. } | ErrorKind::Network | ErrorKind::Unknown => {
            if attempts_left {
                Step::Retry(policy.backoff(attempt))
            } else {
                Step::Exhausted
            }
        }
    }
}

/// Cache-first, retrying, credential-rotating request executor.
pub struct Executor {
    upstream: Arc<dyn Upstream>,
    pool: Arc<CredentialPool>,
    admission: AdmissionController,
    cache: ResponseCache,
    persist: Option<PersistQueue>,
    usage: Arc<dyn UsageSink>,
    policy: RetryPolicy,
}

impl Executor {
    /// Executor with no concurrency limit, an in-memory cache, no
    /// persistence and metrics-only usage accounting.
    pub fn new(upstream: Arc<dyn Upstream>, pool: Arc<CredentialPool>, policy: RetryPolicy) -> Self {
        Self {
            upstream,
            pool,
            admission: AdmissionController::unlimited(),
            cache: ResponseCache::in_memory(DEFAULT_CACHE_BYTES, DEFAULT_CACHE_TTL),
            persist: None,
            usage: Arc::new(MetricsUsage),
            policy,
        }
    }

    pub fn with_admission(mut self, admission: AdmissionController) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_persist(mut self, persist: PersistQueue) -> Self {
        self.persist = Some(persist);
        self
    }

    pub fn with_usage(mut self, usage: Arc<dyn UsageSink>) -> Self {
        self.usage = usage;
        self
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn persist(&self) -> Option<&PersistQueue> {
        self.persist.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `endpoint` with `params`, from cache when possible.
    #[instrument(
        skip_all,
        fields(call_id = %uuid::Uuid::new_v4(), endpoint = %endpoint, upstream = self.upstream.id())
    )]
    pub async fn fetch(&self, endpoint: &str, params: &Params) -> Result<Value> {
        let request = validate(endpoint, params)?;
        let fingerprint = Fingerprint::new(&request);

        if let Some(value) = self.cache.get(&fingerprint).await {
            debug!("cache hit");
            self.usage.on_usage(&request.endpoint, true);
            return Ok(value);
        }

        let credentials = self.pool.len();
        let mut index = self.pool.next_credential();
        let mut attempts = 0u32;
        let mut last_error: Option<UpstreamError> = None;

        'credentials: for tried in 0..credentials {
            let others_remain = tried + 1 < credentials;
            let mut attempt = 1u32;
            loop {
                attempts += 1;
                let err = match self.dispatch(&request, index).await? {
                    Ok(value) => {
                        self.pool.report_success(index);
                        self.complete(&request, &fingerprint, &value).await;
                        debug!(credential = index, attempts, "fetch succeeded");
                        return Ok(value);
                    }
                    Err(err) => err,
                };
                self.pool.report_error(index, &err.kind);
                let step = plan(&self.policy, err.kind, attempt, others_remain);
                let kind = err.kind;
                last_error = Some(err);

                match step {
                    Step::Retry(delay) => {
                        metrics::record_retry(kind.label());
                        warn!(
                            credential = index,
                            attempt,
                            kind = kind.label(),
                            delay_ms = delay.as_millis() as u64,
                            "upstream call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Step::Rotate => {
                        metrics::record_rotation();
                        let next = self.pool.rotate_from(index);
                        info!(from = index, to = next, kind = kind.label(), "rotating credential");
                        index = next;
                        continue 'credentials;
                    }
                    Step::Exhausted => {
                        warn!(credential = index, attempt, kind = kind.label(), "credential attempts exhausted");
                        index = (index + 1) % credentials;
                        continue 'credentials;
                    }
                    Step::Fail => break 'credentials,
                }
            }
        }

        let source = last_error.unwrap_or_else(|| UpstreamError::network("no dispatch attempted"));
        warn!(
            attempts,
            kind = source.kind.label(),
            status = source.status,
            "fetch failed"
        );
        Err(Error::Upstream {
            endpoint: request.endpoint,
            params: request.params,
            attempts,
            source,
        })
    }

    /// One upstream dispatch on credential `index`.
    ///
    /// The outer error is only `Closed`; the inner result is the upstream's.
    async fn dispatch(
        &self,
        request: &UpstreamRequest,
        index: usize,
    ) -> Result<upstream::Result<Value>> {
        let _permit = self.admission.acquire().await?;
        self.pool.wait_for_slot(index).await;

        let started = Instant::now();
        let credential = self.pool.credential(index);
        let result = self.upstream.call(request, credential.expose()).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind.label(),
        };
        metrics::record_dispatch(outcome, started.elapsed());
        Ok(result)
    }

    async fn complete(&self, request: &UpstreamRequest, fingerprint: &Fingerprint, value: &Value) {
        self.cache.put(fingerprint, value).await;
        self.usage.on_usage(&request.endpoint, false);
        if let Some(queue) = &self.persist {
            let records = page_records(value);
            if !records.is_empty() {
                queue.enqueue(records.to_vec());
            }
        }
    }
}

fn validate(endpoint: &str, params: &Params) -> Result<UpstreamRequest> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() || endpoint == "/" {
        return Err(Error::Validation("endpoint must not be empty".into()));
    }
    if endpoint.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "endpoint {endpoint:?} must not contain whitespace"
        )));
    }
    if endpoint.contains("://") {
        return Err(Error::Validation(format!(
            "endpoint {endpoint:?} must be a path, not a URL"
        )));
    }
    if params.iter().any(|(key, _)| key.is_empty()) {
        return Err(Error::Validation("parameter names must not be empty".into()));
    }
    Ok(UpstreamRequest::new(endpoint, params.clone()))
}
