//! Workflow execution results

mod entity;
mod repository;

pub use entity::{
    validate_execution_id, ExecutionId, ExecutionResult, ExecutionStatus, StepResult, StepStatus,
};
pub use repository::ExecutionRepository;

#[cfg(test)]
pub use repository::MockExecutionRepository;
