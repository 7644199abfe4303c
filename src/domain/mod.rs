//! Domain layer - Core business logic and entities

pub mod error;
pub mod execution;
pub mod invoker;
pub mod streaming;
pub mod workflow;

pub use error::DomainError;
pub use execution::{
    ExecutionId, ExecutionRepository, ExecutionResult, ExecutionStatus, StepResult, StepStatus,
};
pub use invoker::{
    AgentInvoker, AgentRequest, ApprovalChannel, ApprovalDecision, ApprovalOutcome,
    ApprovalRequest, BranchCandidate, BranchRanker, EvaluationOutcome, ExpressionEvaluator,
    InvocationContext, InvokerError, MergeStrategy, ToolInvoker, ToolRequest,
};
pub use streaming::{EventSink, ProgressSink, StreamEvent};
pub use workflow::{
    ExecutionContext, OnError, StepKind, WorkflowDefinition, WorkflowError, WorkflowId,
    WorkflowRepository, WorkflowStep,
};
