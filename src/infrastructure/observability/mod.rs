//! Observability infrastructure - Prometheus metrics

mod config;
mod metrics;

pub use config::MetricsConfig;
pub use metrics::{
    create_metrics_router, init_metrics, record_execution_finished, record_execution_started,
    record_step, record_step_retry, PrometheusMetrics,
};
