//! v1 API endpoints

pub mod executions;
pub mod workflows;

use axum::{
    routing::{get, post},
    Router,
};

use super::state::AppState;

/// Create v1 API router
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route(
            "/workflows",
            get(workflows::list_workflows).post(workflows::create_workflow),
        )
        .route(
            "/workflows/{workflow_id}",
            get(workflows::get_workflow).delete(workflows::delete_workflow),
        )
        .route(
            "/workflows/{workflow_id}/validate",
            post(workflows::validate_workflow),
        )
        .route(
            "/workflows/{workflow_id}/executions",
            post(workflows::start_execution),
        )
        .route("/executions/{execution_id}", get(executions::get_execution))
        .route(
            "/executions/{execution_id}/cancel",
            post(executions::cancel_execution),
        )
        .route(
            "/executions/{execution_id}/approvals/{step_id}",
            post(executions::submit_approval),
        )
}
