//! Execution repository trait

use async_trait::async_trait;

use super::{ExecutionId, ExecutionResult};
use crate::domain::error::DomainError;
use crate::domain::workflow::WorkflowId;

#[cfg(test)]
use mockall::automock;

/// Repository for execution results, backing status queries
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Get an execution by ID
    async fn get(&self, id: &ExecutionId) -> Result<Option<ExecutionResult>, DomainError>;

    /// Store a new execution
    async fn create(&self, execution: ExecutionResult) -> Result<ExecutionResult, DomainError>;

    /// Replace the stored snapshot of an execution
    async fn update(&self, execution: ExecutionResult) -> Result<ExecutionResult, DomainError>;

    /// List all executions
    async fn list(&self) -> Result<Vec<ExecutionResult>, DomainError>;

    /// List executions of one workflow
    async fn list_by_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ExecutionResult>, DomainError>;
}
