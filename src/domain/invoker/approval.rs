//! Approval channel trait

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::InvocationContext;
use super::error::InvokerError;
use crate::domain::error::DomainError;

/// A pending approval gate
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    /// `{execution_id}:{step_id}`
    pub approval_id: String,
    pub step_id: String,
    pub message: String,
    pub approvers: Vec<String>,
    pub quorum: u32,
    pub timeout: Duration,
    pub context: InvocationContext,
}

impl ApprovalRequest {
    pub fn approval_id_for(execution_id: &str, step_id: &str) -> String {
        format!("{}:{}", execution_id, step_id)
    }
}

/// How an approval gate resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Quorum reached; approvers in arrival order
    Approved { approvers: Vec<String> },

    Rejected {
        approver: String,
        reason: Option<String>,
    },

    TimedOut,
}

/// A single approver's response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

/// Parks an execution until a human decision arrives
#[async_trait]
pub trait ApprovalChannel: Send + Sync + Debug {
    /// Wait for quorum, the first rejection or the timeout
    async fn await_decision(&self, request: ApprovalRequest)
    -> Result<ApprovalOutcome, InvokerError>;

    /// Record one approver's response to a pending approval
    async fn submit(
        &self,
        approval_id: &str,
        approver: &str,
        decision: ApprovalDecision,
        reason: Option<String>,
    ) -> Result<(), DomainError>;
}
