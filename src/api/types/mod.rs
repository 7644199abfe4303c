//! API types

pub mod error;
pub mod execution;
pub mod json;

pub use error::{ApiError, ApiErrorResponse};
pub use execution::{
    ApprovalSubmission, ExecutionCreatedResponse, ListWorkflowsResponse, StartExecutionQuery,
    WorkflowSummary,
};
pub use json::Json;
