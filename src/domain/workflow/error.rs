//! Workflow error types

use thiserror::Error;

/// Errors that can occur while validating or executing a workflow
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    #[error("Input resolution failed: {0}")]
    InputResolution(String),

    #[error("Timeout in step '{step}' after {timeout_secs}s")]
    InvokerTimeout { step: String, timeout_secs: u64 },

    #[error("Invocation failed in step '{step}': {message}")]
    Invoker { step: String, message: String },

    #[error("Expression evaluation failed: {0}")]
    Evaluator(String),

    #[error("Approval in step '{step}' timed out after {timeout_secs}s")]
    ApprovalTimeout { step: String, timeout_secs: u64 },

    #[error("Approval in step '{step}' rejected by '{approver}'")]
    ApprovalRejected { step: String, approver: String },

    #[error("Aggregation failed in step '{step}': {message}")]
    Aggregation { step: String, message: String },

    #[error("Invocation in step '{0}' aborted")]
    Aborted(String),

    #[error("Invalid workflow definition: {0}")]
    Definition(String),

    #[error("Invalid ID: {0}")]
    InvalidId(String),

    #[error("Step limit of {0} exceeded")]
    StepLimitExceeded(usize),
}

impl WorkflowError {
    pub fn input_resolution(message: impl Into<String>) -> Self {
        Self::InputResolution(message.into())
    }

    pub fn invoker_timeout(step: impl Into<String>, timeout_secs: u64) -> Self {
        Self::InvokerTimeout {
            step: step.into(),
            timeout_secs,
        }
    }

    pub fn invoker(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invoker {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn evaluator(message: impl Into<String>) -> Self {
        Self::Evaluator(message.into())
    }

    pub fn approval_timeout(step: impl Into<String>, timeout_secs: u64) -> Self {
        Self::ApprovalTimeout {
            step: step.into(),
            timeout_secs,
        }
    }

    pub fn approval_rejected(step: impl Into<String>, approver: impl Into<String>) -> Self {
        Self::ApprovalRejected {
            step: step.into(),
            approver: approver.into(),
        }
    }

    pub fn aggregation(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Aggregation {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn aborted(step: impl Into<String>) -> Self {
        Self::Aborted(step.into())
    }

    pub fn definition(message: impl Into<String>) -> Self {
        Self::Definition(message.into())
    }

    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::InvalidId(message.into())
    }

    /// Stable machine-readable error kind, recorded in step metadata
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputResolution(_) => "input_resolution_error",
            Self::InvokerTimeout { .. } => "invoker_timeout_error",
            Self::Invoker { .. } => "invoker_error",
            Self::Evaluator(_) => "evaluator_error",
            Self::ApprovalTimeout { .. } => "approval_timeout_error",
            Self::ApprovalRejected { .. } => "approval_rejected_error",
            Self::Aggregation { .. } => "aggregation_error",
            Self::Aborted(_) => "aborted",
            Self::Definition(_) => "definition_error",
            Self::InvalidId(_) => "invalid_id",
            Self::StepLimitExceeded(_) => "step_limit_exceeded",
        }
    }

    /// Whether another attempt may succeed (collaborator failures only)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvokerTimeout { .. } | Self::Invoker { .. } | Self::Aggregation { .. }
        )
    }
}
