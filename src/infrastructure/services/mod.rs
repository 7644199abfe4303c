//! Infrastructure services

mod execution_service;
mod workflow_service;

pub use execution_service::{ExecutionService, StartExecutionRequest};
pub use workflow_service::{parse_definition_file, ValidationReport, WorkflowService};
