//! Streaming progress events

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::execution::{ExecutionStatus, StepStatus};

/// One event of an execution's progress feed
///
/// Exactly one terminal event (`complete` or `error`) ends each feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The agent is reasoning
    Thinking {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A tool call started
    ToolStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },

    /// A tool call finished
    ToolEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Knowledge retrieval started
    Retrieving {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },

    /// Knowledge retrieval finished
    Retrieved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
    },

    /// Answer generation started
    Generating {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
    },

    /// Content delta
    Chunk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
        content: String,
    },

    StepStart {
        step_id: String,
        step_type: String,
    },

    StepEnd {
        step_id: String,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },

    ApprovalRequested {
        step_id: String,
        approval_id: String,
        message: String,
        approvers: Vec<String>,
        required_approvals: u32,
    },

    /// The execution reached COMPLETED or CANCELLED
    Complete {
        execution_id: String,
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },

    /// The execution failed
    Error {
        execution_id: String,
        message: String,
    },
}

impl StreamEvent {
    /// Event name, matching the `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::Retrieving { .. } => "retrieving",
            Self::Retrieved { .. } => "retrieved",
            Self::Generating { .. } => "generating",
            Self::Chunk { .. } => "chunk",
            Self::StepStart { .. } => "step_start",
            Self::StepEnd { .. } => "step_end",
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
