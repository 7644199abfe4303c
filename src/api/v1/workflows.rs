//! Workflow definition and execution start endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, info};

use crate::api::state::AppState;
use crate::api::types::{
    ApiError, ExecutionCreatedResponse, Json, ListWorkflowsResponse, StartExecutionQuery,
    WorkflowSummary,
};
use crate::domain::{ExecutionStatus, WorkflowDefinition};
use crate::infrastructure::services::{StartExecutionRequest, ValidationReport};

/// Header carrying the id of a streamed execution
pub const EXECUTION_ID_HEADER: &str = "x-execution-id";

/// Bearer token of the incoming request, forwarded to collaborators
fn bearer_credentials(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// GET /v1/workflows
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ListWorkflowsResponse>, ApiError> {
    let workflows: Vec<WorkflowSummary> = state
        .workflow_service
        .list()
        .await?
        .iter()
        .map(WorkflowSummary::from)
        .collect();
    let total = workflows.len();

    Ok(Json(ListWorkflowsResponse { workflows, total }))
}

/// POST /v1/workflows
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<WorkflowDefinition>), ApiError> {
    debug!(workflow_id = %definition.id(), "Registering workflow");

    let created = state.workflow_service.register(definition).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /v1/workflows/{workflow_id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    let definition = state
        .workflow_service
        .get(&workflow_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workflow '{}' not found", workflow_id)))?;

    Ok(Json(definition))
}

/// DELETE /v1/workflows/{workflow_id}
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.workflow_service.delete(&workflow_id).await? {
        return Err(ApiError::not_found(format!(
            "Workflow '{}' not found",
            workflow_id
        )));
    }

    Ok(Json(json!({
        "deleted": true,
        "id": workflow_id
    })))
}

/// POST /v1/workflows/{workflow_id}/validate
pub async fn validate_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<ValidationReport>, ApiError> {
    let definition = state
        .workflow_service
        .get(&workflow_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workflow '{}' not found", workflow_id)))?;

    Ok(Json(state.workflow_service.validate(&definition)))
}

/// POST /v1/workflows/{workflow_id}/executions
///
/// Answers `202` with the execution id, or an SSE feed of progress events with
/// `?stream=true`.
pub async fn start_execution(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Query(query): Query<StartExecutionQuery>,
    headers: HeaderMap,
    Json(request): Json<StartExecutionRequest>,
) -> Result<Response, ApiError> {
    let request = request.with_credentials(bearer_credentials(&headers));

    if query.stream {
        let (execution_id, stream) = state
            .execution_service
            .start_streaming(&workflow_id, request)
            .await?;

        info!(workflow_id = %workflow_id, execution_id = %execution_id, "Streaming execution");

        let events = stream.map(|event| {
            Event::default()
                .event(event.event_type())
                .json_data(&event)
        });

        let mut response = Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response();
        if let Ok(value) = HeaderValue::from_str(execution_id.as_str()) {
            response.headers_mut().insert(EXECUTION_ID_HEADER, value);
        }

        return Ok(response);
    }

    let execution_id = state
        .execution_service
        .start(&workflow_id, request)
        .await?;

    let body = ExecutionCreatedResponse {
        execution_id: execution_id.to_string(),
        workflow_id,
        status: ExecutionStatus::Running,
    };

    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}
