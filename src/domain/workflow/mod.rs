//! Workflow domain module
//!
//! A workflow is a declarative graph of typed steps with an entry point:
//! - `agent` and `tool` steps call out to external collaborators
//! - `parallel` steps fan out to agent branches and aggregate the results
//! - `conditional` steps pick a successor from a classification label
//! - `loop` steps repeat a flat sequence of inner steps
//! - `approval` steps wait for a human quorum
//!
//! ## Variable References
//!
//! Templates reference bound variables with `{{name}}` or `{{name.path.0}}`. Every step
//! output is bound under its step id.

mod context;
mod entity;
mod error;
pub mod repository;
mod step_types;
mod validation;

pub use context::{value_to_string, ExecutionContext, SESSION_ID_VAR, USER_INPUT_VAR};
pub(crate) use context::sole_placeholder;
pub use entity::{
    validate_workflow_id, OnError, WorkflowDefinition, WorkflowId, WorkflowStep,
    DEFAULT_STEP_TIMEOUT_SECS, MAX_ID_LENGTH,
};
pub use error::WorkflowError;
pub use repository::WorkflowRepository;
pub use step_types::{
    AgentRef, AgentStep, Aggregation, ApprovalStep, ConditionalStep, InnerStep, InnerStepKind,
    LoopMode, LoopStep, ParallelBranch, ParallelStep, StepKind, SuggestedAgent, ToolStep,
};
