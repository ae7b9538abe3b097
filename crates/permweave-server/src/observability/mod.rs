//! Observability bootstrap: structured logging and the Prometheus recorder.

mod logging;
mod metrics;

pub use logging::{init_logging, LoggingConfig};
pub use metrics::{
    init_metrics, record_holder_load, record_storage_operation, register_service_metrics,
    MetricsError, MetricsState,
};
