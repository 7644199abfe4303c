use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::health;
use super::state::AppState;
use super::v1;
use crate::infrastructure::observability::{create_metrics_router, PrometheusMetrics};

/// Create the full router with application state
///
/// The Prometheus endpoint is mounted only when metrics are enabled.
pub fn create_router(state: AppState, metrics: Option<(PrometheusMetrics, String)>) -> Router {
    let router = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .nest("/v1", v1::create_v1_router())
        .with_state(state);

    let router = match metrics {
        Some((metrics, path)) => router.merge(create_metrics_router(metrics, &path)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}
