//! Prometheus metrics exposition
//!
//! The gateway crate emits its metrics through the `metrics` facade; this
//! module installs the Prometheus recorder that collects them. The rendered
//! exposition is printed by `--print-metrics`.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Builder with histogram buckets for `gateway_dispatch_duration_seconds`,
/// so it renders as a Prometheus histogram rather than a summary.
fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("gateway_dispatch_duration_seconds".to_string()),
        gateway::metrics::DISPATCH_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}
