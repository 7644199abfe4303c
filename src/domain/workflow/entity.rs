//! Workflow definition entity

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::WorkflowError;
use super::step_types::StepKind;

/// Maximum length for workflow IDs
pub const MAX_ID_LENGTH: usize = 50;

/// Default step timeout in seconds
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 60;

/// Regex pattern for valid workflow IDs: alphanumeric and hyphens
static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]$|^[a-zA-Z0-9]$").unwrap());

pub(crate) fn default_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

/// Validated workflow identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Create a new validated workflow ID
    pub fn new(id: impl Into<String>) -> Result<Self, WorkflowError> {
        let id = id.into();
        validate_workflow_id(&id)?;
        Ok(Self(id))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkflowId {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkflowId> for String {
    fn from(id: WorkflowId) -> Self {
        id.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for WorkflowId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a workflow ID string
pub fn validate_workflow_id(id: &str) -> Result<(), WorkflowError> {
    if id.is_empty() {
        return Err(WorkflowError::invalid_id("Workflow ID cannot be empty"));
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(WorkflowError::invalid_id(format!(
            "Workflow ID exceeds maximum length of {} characters",
            MAX_ID_LENGTH
        )));
    }

    if !ID_PATTERN.is_match(id) {
        return Err(WorkflowError::invalid_id(format!(
            "Invalid workflow ID '{}': must be alphanumeric with hyphens, start and end with alphanumeric",
            id
        )));
    }

    Ok(())
}

/// What the engine does once a step has failed and exhausted its retries
///
/// Wire form is a bare string: `"fail"`, `"skip"`, or the id of the step to jump to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OnError {
    /// Finish the execution as FAILED
    #[default]
    Fail,

    /// Mark the step skipped and continue with its normal successor
    Skip,

    /// Continue with the given step instead of the normal successor
    Jump(String),
}

impl OnError {
    pub fn jump(step_id: impl Into<String>) -> Self {
        Self::Jump(step_id.into())
    }

    /// Step ids that would read back as `Fail` / `Skip` instead of a jump
    pub fn is_keyword(step_id: &str) -> bool {
        matches!(step_id, "fail" | "skip")
    }

    /// The jump target, if any
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Jump(target) => Some(target),
            _ => None,
        }
    }
}

impl From<String> for OnError {
    fn from(value: String) -> Self {
        match value.as_str() {
            "fail" => Self::Fail,
            "skip" => Self::Skip,
            _ => Self::Jump(value),
        }
    }
}

impl From<OnError> for String {
    fn from(value: OnError) -> Self {
        match value {
            OnError::Fail => "fail".to_string(),
            OnError::Skip => "skip".to_string(),
            OnError::Jump(target) => target,
        }
    }
}

/// A node of the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    /// Unique id within the definition
    id: String,

    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    /// Per-attempt deadline in seconds
    #[serde(default = "default_timeout")]
    timeout: u64,

    /// Re-attempts after the first failure
    #[serde(default)]
    retries: u32,

    #[serde(default)]
    on_error: OnError,

    /// Statically declared successor; absent means terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next: Option<String>,

    #[serde(flatten)]
    kind: StepKind,
}

impl WorkflowStep {
    /// Create a new workflow step
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            timeout: default_timeout(),
            retries: 0,
            on_error: OnError::default(),
            next: None,
            kind,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn on_error(&self) -> &OnError {
        &self.on_error
    }

    pub fn next(&self) -> Option<&str> {
        self.next.as_deref()
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }
}

/// A declarative step graph with an entry point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    id: WorkflowId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,

    /// Steps keyed by step id
    #[serde(default)]
    steps: HashMap<String, WorkflowStep>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    entry_step: Option<String>,

    /// Initial variable bindings
    #[serde(default)]
    context: Map<String, Value>,
}

impl WorkflowDefinition {
    /// Create an empty definition
    pub fn new(id: WorkflowId) -> Self {
        Self {
            id,
            name: None,
            description: None,
            steps: HashMap::new(),
            entry_step: None,
            context: Map::new(),
        }
    }

    // Builder methods

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a step; the first step added becomes the entry unless one is set
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        if self.entry_step.is_none() {
            self.entry_step = Some(step.id().to_string());
        }
        self.steps.insert(step.id().to_string(), step);
        self
    }

    pub fn with_entry_step(mut self, step_id: impl Into<String>) -> Self {
        self.entry_step = Some(step_id.into());
        self
    }

    pub fn with_context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    // Getters

    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn steps(&self) -> &HashMap<String, WorkflowStep> {
        &self.steps
    }

    pub fn entry_step(&self) -> Option<&str> {
        self.entry_step.as_deref()
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn get_step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}
