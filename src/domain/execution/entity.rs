//! Execution result entities

use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::DomainError;
use crate::domain::workflow::WorkflowId;

/// Regex pattern for valid execution IDs: exec-{uuid}
static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^exec-[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}$").unwrap()
});

/// Maximum length for execution IDs
pub const MAX_ID_LENGTH: usize = 41; // "exec-" + 36 char UUID

/// Validated execution identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Create a new validated execution ID
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        validate_execution_id(&id)?;
        Ok(Self(id))
    }

    /// Generate a new execution ID with UUID
    pub fn generate() -> Self {
        Self(format!("exec-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExecutionId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExecutionId> for String {
    fn from(id: ExecutionId) -> Self {
        id.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ExecutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate an execution ID string
pub fn validate_execution_id(id: &str) -> Result<(), DomainError> {
    if id.is_empty() {
        return Err(DomainError::invalid_id("Execution ID cannot be empty"));
    }

    if id.len() > MAX_ID_LENGTH || !ID_PATTERN.is_match(id) {
        return Err(DomainError::invalid_id(format!(
            "Invalid execution ID '{}': must be in format exec-{{uuid}}",
            id
        )));
    }

    Ok(())
}

/// Status of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Only a running execution may move, and only to a terminal state
    pub fn can_transition_to(&self, target: ExecutionStatus) -> bool {
        matches!(self, Self::Running) && target.is_terminal()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Status of a single step result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of one step attempt (or one loop iteration)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,

    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl StepResult {
    fn new(step_id: impl Into<String>, status: StepStatus) -> Self {
        Self {
            step_id: step_id.into(),
            step_name: None,
            status,
            output: None,
            error: None,
            duration_ms: None,
            metadata: Map::new(),
        }
    }

    pub fn completed(step_id: impl Into<String>, output: Value) -> Self {
        let mut result = Self::new(step_id, StepStatus::Completed);
        result.output = Some(output);
        result
    }

    pub fn failed(step_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut result = Self::new(step_id, StepStatus::Failed);
        result.error = Some(error.into());
        result
    }

    /// A failed step that `on_error: skip` let through; the cause is kept
    pub fn skipped(step_id: impl Into<String>, error: Option<String>) -> Self {
        let mut result = Self::new(step_id, StepStatus::Skipped);
        result.error = error;
        result
    }

    pub fn with_name(mut self, name: Option<&str>) -> Self {
        self.step_name = name.map(str::to_string);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// The result of one workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    execution_id: ExecutionId,

    workflow_id: WorkflowId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,

    status: ExecutionStatus,

    /// Step results in execution order
    step_results: Vec<StepResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    /// Create a new running execution
    pub fn new(execution_id: ExecutionId, workflow_id: WorkflowId) -> Self {
        Self {
            execution_id,
            workflow_id,
            session_id: None,
            status: ExecutionStatus::Running,
            step_results: Vec::new(),
            output: None,
            duration_ms: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    // Getters

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn step_results(&self) -> &[StepResult] {
        &self.step_results
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append a step result; results are never modified once appended
    pub fn push_step(&mut self, result: StepResult) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Err(DomainError::conflict(format!(
                "Execution '{}' is already {}",
                self.execution_id, self.status
            )));
        }
        self.step_results.push(result);
        Ok(())
    }

    /// Mark the execution as completed with its final output
    pub fn complete(&mut self, output: Option<Value>) -> Result<(), DomainError> {
        self.finish(ExecutionStatus::Completed)?;
        self.output = output;
        Ok(())
    }

    /// Mark the execution as failed
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), DomainError> {
        self.finish(ExecutionStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Mark the execution as cancelled
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.finish(ExecutionStatus::Cancelled)?;
        self.error = Some("Execution cancelled".to_string());
        Ok(())
    }

    fn finish(&mut self, target: ExecutionStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::conflict(format!(
                "Execution '{}' cannot move from {} to {}",
                self.execution_id, self.status, target
            )));
        }

        let now = Utc::now();
        self.status = target;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution() -> ExecutionResult {
        ExecutionResult::new(ExecutionId::generate(), WorkflowId::new("wf").unwrap())
    }

    #[test]
    fn test_execution_id_generate() {
        let id = ExecutionId::generate();
        assert!(id.as_str().starts_with("exec-"));
        assert_eq!(id.as_str().len(), MAX_ID_LENGTH);
        assert!(ExecutionId::new(id.as_str()).is_ok());
    }

    #[test]
    fn test_execution_id_invalid() {
        assert!(ExecutionId::new("").is_err());
        assert!(ExecutionId::new("exec-nope").is_err());
        assert!(ExecutionId::new("op-12345678-1234-1234-1234-123456789abc").is_err());
    }

    #[test]
    fn test_status_transitions() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Running.can_transition_to(ExecutionStatus::Completed));
        assert!(ExecutionStatus::Running.can_transition_to(ExecutionStatus::Cancelled));
        assert!(!ExecutionStatus::Running.can_transition_to(ExecutionStatus::Running));
        assert!(!ExecutionStatus::Completed.can_transition_to(ExecutionStatus::Failed));
        assert!(!ExecutionStatus::Cancelled.can_transition_to(ExecutionStatus::Completed));
    }

    #[test]
    fn test_status_wire_form() {
        assert_eq!(serde_json::to_value(ExecutionStatus::Running).unwrap(), json!("RUNNING"));
        assert_eq!(serde_json::to_value(StepStatus::Skipped).unwrap(), json!("skipped"));
    }

    #[test]
    fn test_complete_sets_output_and_duration() {
        let mut execution = execution();
        execution
            .push_step(StepResult::completed("s1", json!("hello")).with_duration_ms(12))
            .unwrap();
        execution.complete(Some(json!("hello"))).unwrap();

        assert_eq!(execution.status(), ExecutionStatus::Completed);
        assert_eq!(execution.output(), Some(&json!("hello")));
        assert!(execution.duration_ms().is_some());
        assert!(execution.completed_at().is_some());
        assert_eq!(execution.step_results().len(), 1);
    }

    #[test]
    fn test_terminal_execution_rejects_changes() {
        let mut execution = execution();
        execution.fail("boom").unwrap();

        assert!(execution.push_step(StepResult::completed("late", json!(1))).is_err());
        assert!(execution.cancel().is_err());
        assert_eq!(execution.error(), Some("boom"));
    }

    #[test]
    fn test_step_result_serialization_omits_empty_fields() {
        let result = StepResult::skipped("s2", Some("timeout".to_string()))
            .with_name(Some("Fetch"))
            .with_metadata("attempts", json!(2));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], json!("skipped"));
        assert_eq!(value["step_name"], json!("Fetch"));
        assert_eq!(value["metadata"]["attempts"], json!(2));
        assert!(value.get("output").is_none());
    }
}
