//! Prometheus metrics

use crate::backend::BackendId;
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a request routed to a backend
pub fn record_request_routed(backend: BackendId, category: char) {
    metrics::counter!("balancer_requests_routed_total",
        "backend" => backend.to_string(),
        "category" => category.to_string()
    )
    .increment(1);
}

/// Record a request rejected before selection
pub fn record_request_rejected(reason: &'static str) {
    metrics::counter!("balancer_requests_rejected_total", "reason" => reason).increment(1);
}

/// Record a session that completed its exchange
pub fn record_session_completed(backend: BackendId) {
    metrics::counter!("balancer_sessions_completed_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a session that ended in a transfer error
pub fn record_session_failed(backend: BackendId) {
    metrics::counter!("balancer_sessions_failed_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Counts one in-flight session for as long as it is held.
///
/// Dropped when the session task ends, including when it is aborted.
pub struct ActiveSessionGuard(());

impl ActiveSessionGuard {
    pub fn new() -> Self {
        metrics::gauge!("balancer_active_sessions").increment(1.0);
        Self(())
    }
}

impl Default for ActiveSessionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        metrics::gauge!("balancer_active_sessions").decrement(1.0);
    }
}

/// Update the estimated load gauges
pub fn update_backend_loads(loads: &[f64]) {
    for (i, load) in loads.iter().enumerate() {
        metrics::gauge!("balancer_backend_load", "backend" => i.to_string()).set(*load);
    }
}
