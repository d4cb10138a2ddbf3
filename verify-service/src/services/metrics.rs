//! Prometheus metrics for the verification pipeline.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; only the
/// first call installs.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!(error = %e, "Prometheus recorder not installed"),
    }
}

/// Metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// One finished callback: `outcome` is `success` or `failure`, `stage` names
/// where a failure happened (`none` on success).
pub fn record_verification(outcome: &'static str, stage: &'static str) {
    counter!("verification_attempts_total", "outcome" => outcome, "stage" => stage).increment(1);
}

/// One guild's provisioning result.
pub fn record_provisioning(outcome: &'static str) {
    counter!("role_provisioning_total", "outcome" => outcome).increment(1);
}
