//! Workflow step type definitions

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::{default_timeout, OnError};

/// Type-specific configuration of a workflow step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Conversational agent call
    Agent(AgentStep),

    /// Concurrent agent branches joined by an aggregation policy
    Parallel(ParallelStep),

    /// Branch on a classification label
    Conditional(ConditionalStep),

    /// Repeat an inner step sequence
    Loop(LoopStep),

    /// Tool / MCP invocation
    Tool(ToolStep),

    /// Human approval gate
    Approval(ApprovalStep),
}

impl StepKind {
    /// Get a human-readable type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Parallel(_) => "parallel",
            Self::Conditional(_) => "conditional",
            Self::Loop(_) => "loop",
            Self::Tool(_) => "tool",
            Self::Approval(_) => "approval",
        }
    }
}

/// Reference to the agent an `agent` step or parallel branch calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AgentRef {
    /// An existing agent
    Id(String),

    /// Placeholder for an agent that still has to be created
    Suggested { suggested_agent: SuggestedAgent },
}

impl AgentRef {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    /// The resolved agent id, `None` for a suggestion placeholder
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Id(id) => Some(id),
            Self::Suggested { .. } => None,
        }
    }
}

/// Agent the authoring UI proposed but nobody created yet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestedAgent {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

/// Agent step configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStep {
    /// Agent to invoke
    pub agent: AgentRef,

    /// Input template, may embed `{{variable}}` references
    pub input: String,
}

impl AgentStep {
    pub fn new(agent_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            agent: AgentRef::id(agent_id),
            input: input.into(),
        }
    }

    pub fn suggested(agent: SuggestedAgent, input: impl Into<String>) -> Self {
        Self {
            agent: AgentRef::Suggested {
                suggested_agent: agent,
            },
            input: input.into(),
        }
    }
}

/// How branch outputs of a parallel step are combined
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Every successful output keyed by branch id
    #[default]
    All,

    /// First successful output by completion time
    First,

    /// Successful outputs merged into one composite value
    Merge,

    /// Output selected by an external ranker
    Best,
}

/// One concurrent branch of a parallel step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParallelBranch {
    pub id: String,

    pub agent: AgentRef,

    pub input: String,

    /// Branch deadline in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl ParallelBranch {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent: AgentRef::id(agent_id),
            input: input.into(),
            timeout: default_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Parallel step configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParallelStep {
    pub branches: Vec<ParallelBranch>,

    #[serde(default)]
    pub aggregation: Aggregation,
}

impl ParallelStep {
    pub fn new(branches: Vec<ParallelBranch>) -> Self {
        Self {
            branches,
            aggregation: Aggregation::default(),
        }
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }
}

/// Conditional branching step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalStep {
    /// Expression evaluated against the context to obtain a label
    pub condition_source: String,

    /// Classification label -> target step id
    #[serde(default)]
    pub branches: HashMap<String, String>,

    /// Target used when no label matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ConditionalStep {
    pub fn new(condition_source: impl Into<String>) -> Self {
        Self {
            condition_source: condition_source.into(),
            branches: HashMap::new(),
            default: None,
        }
    }

    pub fn with_branch(mut self, label: impl Into<String>, target: impl Into<String>) -> Self {
        self.branches.insert(label.into(), target.into());
        self
    }

    pub fn with_default(mut self, target: impl Into<String>) -> Self {
        self.default = Some(target.into());
        self
    }

    /// Target for a label, falling back to the default
    pub fn target_for(&self, label: &str) -> Option<&str> {
        self.branches
            .get(label)
            .or(self.default.as_ref())
            .map(String::as_str)
    }

    /// Every step id this step can transition to
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.branches
            .values()
            .chain(self.default.iter())
            .map(String::as_str)
    }
}

/// Loop iteration mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    Count,
    Foreach,
    Until,
}

/// Loop step configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopStep {
    pub mode: LoopMode,

    /// Absolute iteration ceiling, enforced in every mode
    pub max_iterations: u32,

    /// Collection expression (foreach)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over: Option<String>,

    /// Iteration count expression (count)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<String>,

    /// Stop after an iteration when true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_condition: Option<String>,

    /// Stop before an iteration when true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_condition: Option<String>,

    /// Stop after an iteration when false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_condition: Option<String>,

    /// Variable bound to the current item (foreach) or iteration index
    #[serde(default = "default_item_variable")]
    pub item_variable: String,

    /// Steps run once per iteration, in order
    pub steps: Vec<InnerStep>,

    #[serde(default)]
    pub collect_results: bool,
}

fn default_item_variable() -> String {
    "item".to_string()
}

impl LoopStep {
    pub fn new(mode: LoopMode, max_iterations: u32, steps: Vec<InnerStep>) -> Self {
        Self {
            mode,
            max_iterations,
            over: None,
            count: None,
            exit_condition: None,
            break_condition: None,
            continue_condition: None,
            item_variable: default_item_variable(),
            steps,
            collect_results: false,
        }
    }

    pub fn foreach(over: impl Into<String>, max_iterations: u32, steps: Vec<InnerStep>) -> Self {
        Self::new(LoopMode::Foreach, max_iterations, steps).with_over(over)
    }

    pub fn with_over(mut self, over: impl Into<String>) -> Self {
        self.over = Some(over.into());
        self
    }

    pub fn with_count(mut self, count: impl Into<String>) -> Self {
        self.count = Some(count.into());
        self
    }

    pub fn with_exit_condition(mut self, condition: impl Into<String>) -> Self {
        self.exit_condition = Some(condition.into());
        self
    }

    pub fn with_break_condition(mut self, condition: impl Into<String>) -> Self {
        self.break_condition = Some(condition.into());
        self
    }

    pub fn with_continue_condition(mut self, condition: impl Into<String>) -> Self {
        self.continue_condition = Some(condition.into());
        self
    }

    pub fn with_item_variable(mut self, name: impl Into<String>) -> Self {
        self.item_variable = name.into();
        self
    }

    pub fn with_collect_results(mut self, collect: bool) -> Self {
        self.collect_results = collect;
        self
    }

    pub fn has_condition(&self) -> bool {
        self.exit_condition.is_some()
            || self.break_condition.is_some()
            || self.continue_condition.is_some()
    }
}

/// Tool step configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolStep {
    /// Tool or MCP reference
    pub tool: String,

    /// Payload; string leaves are templates
    #[serde(default)]
    pub input: Value,
}

impl ToolStep {
    pub fn new(tool: impl Into<String>, input: Value) -> Self {
        Self {
            tool: tool.into(),
            input,
        }
    }
}

/// Approval gate configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalStep {
    /// Message template shown to approvers
    pub message: String,

    pub approvers: Vec<String>,

    #[serde(default = "default_required_approvals")]
    pub required_approvals: u32,

    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_seconds: u64,

    #[serde(default)]
    pub on_reject: OnError,
}

fn default_required_approvals() -> u32 {
    1
}

fn default_approval_timeout() -> u64 {
    86_400
}

impl ApprovalStep {
    pub fn new(message: impl Into<String>, approvers: Vec<String>) -> Self {
        Self {
            message: message.into(),
            approvers,
            required_approvals: default_required_approvals(),
            approval_timeout_seconds: default_approval_timeout(),
            on_reject: OnError::default(),
        }
    }

    pub fn with_required_approvals(mut self, required: u32) -> Self {
        self.required_approvals = required;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.approval_timeout_seconds = seconds;
        self
    }

    pub fn with_on_reject(mut self, on_reject: OnError) -> Self {
        self.on_reject = on_reject;
        self
    }
}

/// Step kinds allowed inside a loop body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InnerStepKind {
    Agent(AgentStep),
    Tool(ToolStep),
    Conditional(ConditionalStep),
}

impl InnerStepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Tool(_) => "tool",
            Self::Conditional(_) => "conditional",
        }
    }
}

/// A step inside a loop body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InnerStep {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub on_error: OnError,

    #[serde(flatten)]
    pub kind: InnerStepKind,
}

impl InnerStep {
    pub fn new(id: impl Into<String>, kind: InnerStepKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            timeout: default_timeout(),
            retries: 0,
            on_error: OnError::default(),
            kind,
        }
    }

    pub fn agent(id: impl Into<String>, step: AgentStep) -> Self {
        Self::new(id, InnerStepKind::Agent(step))
    }

    pub fn tool(id: impl Into<String>, step: ToolStep) -> Self {
        Self::new(id, InnerStepKind::Tool(step))
    }

    pub fn conditional(id: impl Into<String>, step: ConditionalStep) -> Self {
        Self::new(id, InnerStepKind::Conditional(step))
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }
}
