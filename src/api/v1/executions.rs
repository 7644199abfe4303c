//! Execution status, cancellation and approval endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::json;
use tracing::debug;

use crate::api::state::AppState;
use crate::api::types::{ApiError, ApprovalSubmission, Json};
use crate::domain::ExecutionResult;

/// GET /v1/executions/{execution_id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let result = state.execution_service.status(&execution_id).await?;
    Ok(Json(result))
}

/// POST /v1/executions/{execution_id}/cancel
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    state.execution_service.cancel(&execution_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": execution_id,
            "cancellation_requested": true
        })),
    ))
}

/// POST /v1/executions/{execution_id}/approvals/{step_id}
pub async fn submit_approval(
    State(state): State<AppState>,
    Path((execution_id, step_id)): Path<(String, String)>,
    Json(submission): Json<ApprovalSubmission>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    debug!(
        execution_id = %execution_id,
        step_id = %step_id,
        approver = %submission.approver,
        "Approval submitted"
    );

    state
        .execution_service
        .submit_approval(
            &execution_id,
            &step_id,
            &submission.approver,
            submission.decision,
            submission.reason,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "execution_id": execution_id,
            "step_id": step_id,
            "recorded": true
        })),
    ))
}
