//! External collaborator interfaces
//!
//! The engine never reaches into ambient state: everything a collaborator needs,
//! credentials included, travels in the request.

mod agent;
mod aggregation;
mod approval;
mod context;
mod error;
mod evaluator;
mod tool;

pub use agent::{AgentInvoker, AgentRequest};
pub use aggregation::{BranchCandidate, BranchRanker, MergeStrategy};
pub use approval::{ApprovalChannel, ApprovalDecision, ApprovalOutcome, ApprovalRequest};
pub use context::InvocationContext;
pub use error::InvokerError;
pub use evaluator::{EvaluationOutcome, ExpressionEvaluator};
pub use tool::{ToolInvoker, ToolRequest};

#[cfg(test)]
pub mod mock {
    pub use super::agent::mock::MockAgentInvoker;
    pub use super::aggregation::mock::FixedRanker;
    pub use super::approval::mock::FixedApprovalChannel;
    pub use super::tool::mock::MockToolInvoker;
}
