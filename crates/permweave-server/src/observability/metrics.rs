//! Prometheus metrics infrastructure.
//!
//! # Metrics Exposed
//!
//! - `permweave_cached_data_*` - Per-holder cache activity (see the domain crate)
//! - `permweave_permission_checks_total` - Permission checks by result
//! - `permweave_holder_loads_total` - Holder loads from storage by kind and status
//! - `permweave_holder_load_duration_seconds` - Holder load duration histogram
//! - `permweave_storage_operations_total` - Storage writes by operation and status

use std::sync::Arc;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Shared handle used to render the collected metrics.
#[derive(Clone)]
pub struct MetricsState {
    handle: Arc<PrometheusHandle>,
}

impl MetricsState {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Renders the current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Error type for metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: recorder already installed")]
    AlreadyInstalled,
}

/// Installs the Prometheus recorder and describes every metric.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics() -> Result<MetricsState, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|_| MetricsError::AlreadyInstalled)?;

    permweave_domain::register_cached_data_metrics();
    register_service_metrics();

    Ok(MetricsState::new(handle))
}

pub fn register_service_metrics() {
    metrics::describe_counter!(
        "permweave_holder_loads_total",
        "Total number of holder loads from storage"
    );
    metrics::describe_histogram!(
        "permweave_holder_load_duration_seconds",
        "Holder load duration in seconds"
    );
    metrics::describe_counter!(
        "permweave_storage_operations_total",
        "Total number of storage writes"
    );
}

/// Records one holder load. `kind` is `user` or `group`.
pub fn record_holder_load(kind: &'static str, success: bool, duration_seconds: f64) {
    let status = if success { "ok" } else { "error" };
    metrics::counter!("permweave_holder_loads_total", "kind" => kind, "status" => status)
        .increment(1);
    metrics::histogram!("permweave_holder_load_duration_seconds", "kind" => kind)
        .record(duration_seconds);
}

pub fn record_storage_operation(operation: &'static str, success: bool) {
    let status = if success { "ok" } else { "error" };
    metrics::counter!(
        "permweave_storage_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}
