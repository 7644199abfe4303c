//! Prometheus metrics infrastructure

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::config::MetricsConfig;
use crate::domain::{ExecutionStatus, StepStatus};

/// Prometheus metrics handle for serving metrics endpoint
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Get the metrics as a string for the /metrics endpoint
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Initialize Prometheus metrics
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("workflow_engine_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);

            tracing::info!("Prometheus metrics initialized at {}", config.path);

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

/// Create the metrics router
pub fn create_metrics_router(metrics: PrometheusMetrics, path: &str) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<PrometheusMetrics>) -> impl IntoResponse {
    metrics.render()
}

/// Record a started execution
pub fn record_execution_started(workflow_id: &str) {
    counter!("workflow_executions_started_total", "workflow" => workflow_id.to_string())
        .increment(1);
    gauge!("workflow_executions_running").increment(1.0);
}

/// Record a finished execution
pub fn record_execution_finished(workflow_id: &str, status: ExecutionStatus, duration: Duration) {
    let labels = [
        ("workflow", workflow_id.to_string()),
        ("status", status.to_string()),
    ];

    counter!("workflow_executions_total", &labels).increment(1);
    histogram!("workflow_execution_duration_seconds", &labels).record(duration.as_secs_f64());
    gauge!("workflow_executions_running").decrement(1.0);
}

/// Record one step result
pub fn record_step(step_type: &str, status: StepStatus, duration: Duration) {
    let labels = [
        ("type", step_type.to_string()),
        ("status", status.to_string()),
    ];

    counter!("workflow_steps_total", &labels).increment(1);
    histogram!("workflow_step_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Record a retried collaborator attempt
pub fn record_step_retry(step_type: &str, error_kind: &str) {
    counter!(
        "workflow_step_retries_total",
        "type" => step_type.to_string(),
        "error" => error_kind.to_string()
    )
    .increment(1);
}
