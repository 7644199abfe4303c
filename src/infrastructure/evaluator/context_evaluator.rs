//! Expression evaluator over the execution context
//!
//! Supported forms:
//! - `{{path}}` or `path`: the bound value; strings become classification labels
//! - `left OP right` with OP in `==`, `!=`, `>`, `>=`, `<`, `<=`, `contains`,
//!   `starts_with`, `ends_with`
//! - `operand is_empty` / `operand is_not_empty`
//!
//! Operands are `{{path}}` references, quoted strings, JSON literals or bare words. A
//! bare word resolves as a path when bound and is otherwise taken literally.

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use super::operator::ConditionOperator;
use crate::domain::workflow::{sole_placeholder, ExecutionContext};
use crate::domain::{EvaluationOutcome, ExpressionEvaluator};

/// Default evaluator for conditional and loop expressions
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextExpressionEvaluator;

impl ContextExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate synchronously
    pub fn evaluate_expression(
        &self,
        expression: &str,
        context: &ExecutionContext,
    ) -> Result<EvaluationOutcome, String> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err("empty expression".to_string());
        }

        let tokens = tokenize(expression)?;

        match tokens.as_slice() {
            [single]
                if sole_placeholder(single).is_none()
                    && ExecutionContext::has_variables(single) =>
            {
                template_label(expression, context)
            }
            [single] => resolve_single(single, context),
            [operand, op] => match ConditionOperator::from_token(op) {
                Some(operator) if operator.is_unary() => {
                    let value = resolve_operand(operand, context)?;
                    Ok(EvaluationOutcome::Bool(operator.evaluate(&value, &Value::Null)))
                }
                _ => template_label(expression, context),
            },
            [left, op, right] => match ConditionOperator::from_token(op) {
                Some(operator) if !operator.is_unary() => {
                    let left = resolve_operand(left, context)?;
                    let right = resolve_operand(right, context)?;
                    trace!(?left, ?operator, ?right, "Evaluating comparison");
                    Ok(EvaluationOutcome::Bool(operator.evaluate(&left, &right)))
                }
                _ => template_label(expression, context),
            },
            _ => template_label(expression, context),
        }
    }
}

#[async_trait]
impl ExpressionEvaluator for ContextExpressionEvaluator {
    async fn evaluate(
        &self,
        expression: &str,
        context: &ExecutionContext,
    ) -> Result<EvaluationOutcome, String> {
        self.evaluate_expression(expression, context)
    }
}

/// A whole expression that is not a comparison: interpolate it into a label
fn template_label(
    expression: &str,
    context: &ExecutionContext,
) -> Result<EvaluationOutcome, String> {
    if !ExecutionContext::has_variables(expression) {
        return Err(format!("unsupported expression '{}'", expression));
    }

    context
        .resolve_template(expression)
        .map(|label| EvaluationOutcome::Label(label.trim().to_string()))
        .map_err(|e| e.to_string())
}

fn resolve_single(token: &str, context: &ExecutionContext) -> Result<EvaluationOutcome, String> {
    let value = if let Some(path) = sole_placeholder(token) {
        lookup(path, context)?
    } else if let Some(literal) = parse_literal(token) {
        literal
    } else {
        lookup(token, context)?
    };

    Ok(match value {
        Value::String(label) => EvaluationOutcome::Label(label.trim().to_string()),
        Value::Bool(b) => EvaluationOutcome::Bool(b),
        other => EvaluationOutcome::Value(other),
    })
}

fn resolve_operand(token: &str, context: &ExecutionContext) -> Result<Value, String> {
    if let Some(path) = sole_placeholder(token) {
        return lookup(path, context);
    }

    if let Some(literal) = parse_literal(token) {
        return Ok(literal);
    }

    Ok(context
        .lookup(token)
        .cloned()
        .unwrap_or_else(|| Value::String(token.to_string())))
}

fn lookup(path: &str, context: &ExecutionContext) -> Result<Value, String> {
    context
        .lookup(path)
        .cloned()
        .ok_or_else(|| format!("unresolved variable '{}'", path))
}

/// Quoted strings and JSON literals
fn parse_literal(token: &str) -> Option<Value> {
    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        return Some(Value::String(token[1..token.len() - 1].to_string()));
    }

    serde_json::from_str::<Value>(token).ok()
}

/// Split on whitespace, keeping quoted strings, brackets and placeholders whole
fn tokenize(expression: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth: i32 = 0;

    for c in expression.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                '[' | '{' => {
                    depth += 1;
                    current.push(c);
                }
                ']' | '}' => {
                    depth -= 1;
                    current.push(c);
                }
                c if c.is_whitespace() && depth == 0 => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }

    if quote.is_some() {
        return Err(format!("unterminated string in '{}'", expression));
    }

    if depth != 0 {
        return Err(format!("unbalanced brackets in '{}'", expression));
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    Ok(tokens)
}
