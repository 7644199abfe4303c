//! Request and response bodies of the workflow and execution endpoints

use serde::{Deserialize, Serialize};

use crate::domain::{ApprovalDecision, ExecutionStatus, WorkflowDefinition};

/// Query string of `POST /v1/workflows/{id}/executions`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartExecutionQuery {
    /// Answer with an SSE feed instead of the execution id
    #[serde(default)]
    pub stream: bool,
}

/// Returned when a background execution starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCreatedResponse {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
}

/// Body of `POST /v1/executions/{id}/approvals/{step_id}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalSubmission {
    pub approver: String,
    pub decision: ApprovalDecision,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_step: Option<String>,
    pub step_count: usize,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            id: definition.id().as_str().to_string(),
            name: definition.name().map(String::from),
            description: definition.description().map(String::from),
            entry_step: definition.entry_step().map(String::from),
            step_count: definition.step_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListWorkflowsResponse {
    pub workflows: Vec<WorkflowSummary>,
    pub total: usize,
}
