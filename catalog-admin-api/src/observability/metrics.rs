//! Prometheus metrics for the catalog admin API
//!
//! - HTTP request counts and latency, labelled by method, route and status
//! - Security event counters (accepted and throttled)
//! - Guard rejections and background sweep results
//! - `/metrics` endpoint for Prometheus scraping
//!
//! # Example
//!
//! ```rust,ignore
//! use catalog_admin_api::observability::metrics::{init_metrics, metrics_handler};
//! use axum::{Router, routing::get};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let app: Router<()> = Router::new().route("/metrics", get(metrics_handler));
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use catalog_admin_core::{SecurityEventType, Severity};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::error;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder.
///
/// Must be called once at startup before metrics are collected. Later calls
/// return `Ok` without re-installing.
///
/// # Errors
///
/// Returns an error if the Prometheus exporter fails to install.
pub fn init_metrics() -> Result<(), MetricsError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("http_request_duration".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )
        .map_err(|e| MetricsError::Installation(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Installation("Handle already set".to_string()))?;

    register_metric_descriptions();

    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total HTTP requests by method, route and status"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request latency including every pipeline stage"
    );
    describe_counter!(
        "security_events_total",
        Unit::Count,
        "Security events accepted by the monitor, by type and severity"
    );
    describe_counter!(
        "security_events_throttled_total",
        Unit::Count,
        "Security events dropped by the per-actor emission throttle"
    );
    describe_counter!(
        "security_alerts_total",
        Unit::Count,
        "High and critical events forwarded to the alert dispatcher"
    );
    describe_counter!(
        "pipeline_rejections_total",
        Unit::Count,
        "Requests rejected by a pipeline guard, by error code"
    );
    describe_gauge!(
        "security_suspicious_actors",
        Unit::Count,
        "Actors currently at or above the suspicious threshold"
    );
    describe_counter!(
        "sweep_removed_total",
        Unit::Count,
        "Entries removed by background sweepers, by sweeper"
    );
}

/// Metrics-related errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to install metrics exporter: {0}")]
    Installation(String),
}

/// Handler for the `/metrics` endpoint
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => {
            error!("Metrics handler called but metrics not initialized");
            (StatusCode::INTERNAL_SERVER_ERROR, "Metrics not initialized").into_response()
        }
    }
}

/// HTTP request metrics recorded once per request by the pipeline
pub struct HttpMetrics;

impl HttpMetrics {
    pub fn record(method: &str, route: &str, status: u16, duration: Duration) {
        counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!(
            "http_request_duration_seconds",
            "method" => method.to_string(),
            "route" => route.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// A guard short-circuited the request with `code`
    pub fn rejection(code: &'static str) {
        counter!("pipeline_rejections_total", "code" => code).increment(1);
    }
}

/// Security monitor metrics
pub struct SecurityMetrics;

impl SecurityMetrics {
    pub fn event_recorded(event_type: SecurityEventType, severity: Severity) {
        counter!(
            "security_events_total",
            "type" => event_type.as_str(),
            "severity" => severity.as_str()
        )
        .increment(1);
    }

    pub fn event_throttled(event_type: SecurityEventType) {
        counter!("security_events_throttled_total", "type" => event_type.as_str()).increment(1);
    }

    pub fn alert_dispatched(severity: Severity) {
        counter!("security_alerts_total", "severity" => severity.as_str()).increment(1);
    }

    pub fn set_suspicious_actors(count: usize) {
        gauge!("security_suspicious_actors").set(count as f64);
    }

    pub fn sweep_removed(sweeper: &'static str, removed: usize) {
        counter!("sweep_removed_total", "sweeper" => sweeper).increment(removed as u64);
    }
}
