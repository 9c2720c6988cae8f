//! Usage accounting hook

use crate::metrics;

/// Receives one event per successful logical call.
///
/// `cached` is true when the response was served from the cache and no
/// upstream request was made.
pub trait UsageSink: Send + Sync {
    fn on_usage(&self, endpoint: &str, cached: bool);
}

impl<F> UsageSink for F
where
    F: Fn(&str, bool) + Send + Sync,
{
    fn on_usage(&self, endpoint: &str, cached: bool) {
        self(endpoint, cached)
    }
}

/// Default sink: a `gateway_usage_total` counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsUsage;

impl UsageSink for MetricsUsage {
    fn on_usage(&self, _endpoint: &str, cached: bool) {
        metrics::record_usage(cached);
    }
}
