//! Gateway metrics
//!
//! Emitted through the `metrics` facade; the binary installs a Prometheus
//! recorder. Without a recorder every call is a no-op.
//!
//! - `gateway_dispatch_total` (counter): label `outcome`
//! - `gateway_dispatch_duration_seconds` (histogram): label `outcome`
//! - `gateway_retries_total` (counter): label `kind`
//! - `gateway_rotations_total` (counter)
//! - `gateway_cache_total` (counter): label `result`
//! - `gateway_usage_total` (counter): label `cached`
//! - `gateway_in_flight` (gauge)
//! - `gateway_persist_records_total` (counter): label `outcome`
//! - `gateway_persist_evicted_total` (counter)
//! - `gateway_pages_fetched_total` (counter)

use std::time::Duration;

/// Histogram buckets for `gateway_dispatch_duration_seconds`, 5ms to 60s.
pub const DISPATCH_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Record one upstream dispatch. `outcome` is "ok" or an error kind label.
pub fn record_dispatch(outcome: &'static str, duration: Duration) {
    metrics::counter!("gateway_dispatch_total", "outcome" => outcome).increment(1);
    metrics::histogram!("gateway_dispatch_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

pub fn record_retry(kind: &'static str) {
    metrics::counter!("gateway_retries_total", "kind" => kind).increment(1);
}

pub fn record_rotation() {
    metrics::counter!("gateway_rotations_total").increment(1);
}

pub fn record_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("gateway_cache_total", "result" => result).increment(1);
}

pub fn record_usage(cached: bool) {
    let cached = if cached { "true" } else { "false" };
    metrics::counter!("gateway_usage_total", "cached" => cached).increment(1);
}

pub fn set_in_flight(in_flight: usize) {
    metrics::gauge!("gateway_in_flight").set(in_flight as f64);
}

/// `outcome` is one of "queued", "duplicate", "written", "failed".
pub fn record_persisted(outcome: &'static str, count: usize) {
    metrics::counter!("gateway_persist_records_total", "outcome" => outcome)
        .increment(count as u64);
}

pub fn record_evicted(count: usize) {
    metrics::counter!("gateway_persist_evicted_total").increment(count as u64);
}

pub fn record_page_fetched() {
    metrics::counter!("gateway_pages_fetched_total").increment(1);
}
