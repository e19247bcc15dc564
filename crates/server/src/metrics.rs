// crates/server/src/metrics.rs
//! Application metrics for Prometheus monitoring.
//!
//! The progress registry records its counters through the `metrics` facade;
//! this module installs the Prometheus recorder that collects them and
//! renders the `/metrics` payload.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use docscan_progress::RegistryStats;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    let mut installed = false;
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Failed to set global metrics recorder (already set)");
        } else {
            describe_metrics();
            installed = true;
            tracing::info!("Prometheus metrics initialized");
        }
        handle
    });
    installed
}

fn describe_metrics() {
    describe_counter!(
        "progress_updates_total",
        "Progress updates applied by producers (including complete/fail)"
    );
    describe_counter!(
        "progress_subscriptions_total",
        "Viewers that subscribed to a job's progress"
    );
    describe_counter!(
        "progress_sink_failures_total",
        "Viewers dropped after a failed write, by reason"
    );
    describe_counter!(
        "progress_jobs_reaped_total",
        "Terminal jobs cleaned up after their grace period"
    );
    describe_gauge!("progress_tracked_jobs", "Jobs currently held in memory");
    describe_gauge!("progress_subscribers", "Open viewer connections");
}

/// Publish registry gauges. Called right before rendering so the values are current.
pub fn record_registry(stats: RegistryStats) {
    metrics::gauge!("progress_tracked_jobs").set(stats.tracked_jobs as f64);
    metrics::gauge!("progress_subscribers").set(stats.subscribers as f64);
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}
