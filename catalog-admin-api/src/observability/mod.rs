//! Observability: structured logging, request correlation and Prometheus metrics

pub mod logging;
pub mod metrics;

pub use logging::{
    init_logging, request_id_from, set_request_id, LogConfig, LogFormat, LoggingError,
    REQUEST_ID_HEADER,
};
pub use metrics::{init_metrics, metrics_handler, HttpMetrics, MetricsError, SecurityMetrics};
