//! Expression evaluator trait

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::workflow::{value_to_string, ExecutionContext};

/// Result of evaluating a conditional or loop expression
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// Classification label
    Label(String),
    Bool(bool),
    Value(Value),
}

impl EvaluationOutcome {
    /// Label used to pick a conditional branch
    pub fn as_label(&self) -> String {
        match self {
            Self::Label(label) => label.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Value(value) => value_to_string(value),
        }
    }

    /// Truthiness used by loop conditions
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Label(label) => !matches!(label.trim(), "" | "false" | "0" | "no"),
            Self::Value(value) => match value {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                Value::String(s) => !s.is_empty() && s != "false",
                Value::Array(items) => !items.is_empty(),
                Value::Object(obj) => !obj.is_empty(),
            },
        }
    }

    /// The outcome as a JSON value
    pub fn into_value(self) -> Value {
        match self {
            Self::Label(label) => Value::String(label),
            Self::Bool(b) => Value::Bool(b),
            Self::Value(value) => value,
        }
    }
}

/// Evaluates `condition_source` and loop expressions against the run-time context
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync + Debug {
    async fn evaluate(
        &self,
        expression: &str,
        context: &ExecutionContext,
    ) -> Result<EvaluationOutcome, String>;
}
