//! In-process fakes shared by the gateway tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::Secret;
use credential_pool::{CredentialPool, RotationStrategy};
use serde_json::{Value, json};
use tokio::time::Instant;
use upstream::{CallFuture, Params, Upstream, UpstreamError, UpstreamRequest};

use crate::persist::{PersistError, PersistSink, SaveFuture};

type Handler = dyn Fn(&UpstreamRequest, &str, u32) -> upstream::Result<Value> + Send + Sync;

/// One dispatch observed by `ScriptedUpstream`.
#[derive(Debug, Clone)]
pub struct Call {
    pub credential: String,
    pub endpoint: String,
    pub params: Params,
    pub at: Instant,
}

/// Upstream whose responses come from a closure.
///
/// The closure receives the request, the credential and the 1-based number
/// of the call across the upstream's lifetime.
pub struct ScriptedUpstream {
    handler: Box<Handler>,
    latency: Duration,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedUpstream {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&UpstreamRequest, &str, u32) -> upstream::Result<Value> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Always answers with `value`.
    pub fn ok(value: Value) -> Self {
        Self::new(move |_, _, _| Ok(value.clone()))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn credentials_used(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.credential).collect()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Upstream for ScriptedUpstream {
    fn id(&self) -> &str {
        "scripted"
    }

    fn call<'a>(&'a self, request: &'a UpstreamRequest, credential: &'a str) -> CallFuture<'a> {
        Box::pin(async move {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Call {
                    credential: credential.to_string(),
                    endpoint: request.endpoint.clone(),
                    params: request.params.clone(),
                    at: Instant::now(),
                });
                calls.len() as u32
            };
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            (self.handler)(request, credential, n)
        })
    }
}

/// Sink that keeps every written batch in memory.
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<Value>>>,
    latency: Duration,
    failing: AtomicBool,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            failing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<Value>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn records_written(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl PersistSink for RecordingSink {
    fn save_batch<'a>(&'a self, records: &'a [Value]) -> SaveFuture<'a> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(PersistError::Write("disk full".into()));
            }
            self.batches.lock().unwrap().push(records.to_vec());
            Ok(records.iter().map(|r| r["id"].to_string()).collect())
        })
    }
}

pub fn pool(n: usize, strategy: RotationStrategy, min_interval: Duration) -> Arc<CredentialPool> {
    let keys = (0..n).map(|i| Secret::new(format!("key-{i}"))).collect();
    Arc::new(CredentialPool::new(keys, strategy, min_interval).unwrap())
}

/// `{"id": i}` for each i in `range`.
pub fn rows(range: std::ops::Range<u64>) -> Vec<Value> {
    range.map(|i| json!({ "id": i })).collect()
}

pub fn status(code: u16) -> UpstreamError {
    UpstreamError::from_status(code, None, "")
}

pub fn rate_limited(retry_after: Option<Duration>) -> UpstreamError {
    UpstreamError::from_status(429, retry_after, "slow down")
}
