//! Prometheus export for gate counters.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global recorder. Call once at startup.
pub fn init_metrics() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    if METRICS_HANDLE.set(handle).is_err() {
        anyhow::bail!("Metrics recorder already initialized");
    }

    ::metrics::describe_counter!("gate_evaluations_total", "Gate evaluations by terminal state");
    ::metrics::describe_counter!(
        "gate_challenge_verifications_total",
        "Second-factor submissions by kind and result"
    );
    ::metrics::describe_counter!("gate_session_validations_total", "Session validations by result");

    Ok(())
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}
