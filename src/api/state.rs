//! Application state for shared services

use std::sync::Arc;

use crate::infrastructure::services::{ExecutionService, WorkflowService};

/// Services shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub workflow_service: Arc<WorkflowService>,
    pub execution_service: Arc<ExecutionService>,
}

impl AppState {
    pub fn new(
        workflow_service: Arc<WorkflowService>,
        execution_service: Arc<ExecutionService>,
    ) -> Self {
        Self {
            workflow_service,
            execution_service,
        }
    }
}
