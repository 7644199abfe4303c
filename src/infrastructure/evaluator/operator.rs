//! Comparison operators for condition expressions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Condition comparison operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Equal to
    Eq,

    /// Not equal to
    Ne,

    /// Greater than
    Gt,

    /// Greater than or equal to
    Gte,

    /// Less than
    Lt,

    /// Less than or equal to
    Lte,

    /// Is empty (for arrays/strings/null)
    IsEmpty,

    /// Is not empty
    IsNotEmpty,

    /// Contains (for strings/arrays)
    Contains,

    /// Starts with (for strings)
    StartsWith,

    /// Ends with (for strings)
    EndsWith,
}

impl ConditionOperator {
    /// Parse an operator token as written in an expression
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            "is_empty" => Some(Self::IsEmpty),
            "is_not_empty" => Some(Self::IsNotEmpty),
            "contains" => Some(Self::Contains),
            "starts_with" => Some(Self::StartsWith),
            "ends_with" => Some(Self::EndsWith),
            _ => None,
        }
    }

    /// Operators written as a suffix with no right-hand operand
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::IsEmpty | Self::IsNotEmpty)
    }

    /// Evaluate the condition
    pub fn evaluate(&self, field_value: &Value, compare_value: &Value) -> bool {
        match self {
            Self::Eq => values_equal(field_value, compare_value),
            Self::Ne => !values_equal(field_value, compare_value),
            Self::Gt => compare_numbers(field_value, compare_value, |a, b| a > b),
            Self::Gte => compare_numbers(field_value, compare_value, |a, b| a >= b),
            Self::Lt => compare_numbers(field_value, compare_value, |a, b| a < b),
            Self::Lte => compare_numbers(field_value, compare_value, |a, b| a <= b),
            Self::IsEmpty => is_empty(field_value),
            Self::IsNotEmpty => !is_empty(field_value),
            Self::Contains => contains(field_value, compare_value),
            Self::StartsWith => starts_with(field_value, compare_value),
            Self::EndsWith => ends_with(field_value, compare_value),
        }
    }
}

/// Numeric view of a value; agent outputs often carry numbers as text
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }

    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y)
        }
        (Value::String(x), Value::String(y)) => x.trim() == y.trim(),
        _ => false,
    }
}

fn compare_numbers<F>(a: &Value, b: &Value, f: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (as_number(a), as_number(b)) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

fn contains(field: &Value, value: &Value) -> bool {
    match field {
        Value::String(s) => value.as_str().is_some_and(|v| s.contains(v)),
        Value::Array(arr) => arr.iter().any(|item| values_equal(item, value)),
        Value::Object(obj) => value.as_str().is_some_and(|key| obj.contains_key(key)),
        _ => false,
    }
}

fn starts_with(field: &Value, value: &Value) -> bool {
    match (field.as_str(), value.as_str()) {
        (Some(f), Some(v)) => f.starts_with(v),
        _ => false,
    }
}

fn ends_with(field: &Value, value: &Value) -> bool {
    match (field.as_str(), value.as_str()) {
        (Some(f), Some(v)) => f.ends_with(v),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_token() {
        assert_eq!(ConditionOperator::from_token(">="), Some(ConditionOperator::Gte));
        assert_eq!(
            ConditionOperator::from_token("is_not_empty"),
            Some(ConditionOperator::IsNotEmpty)
        );
        assert_eq!(ConditionOperator::from_token("=~"), None);
        assert!(ConditionOperator::IsEmpty.is_unary());
        assert!(!ConditionOperator::Contains.is_unary());
    }

    #[test]
    fn test_equality_is_numeric_aware() {
        assert!(ConditionOperator::Eq.evaluate(&json!(1), &json!(1.0)));
        assert!(ConditionOperator::Eq.evaluate(&json!("3"), &json!(3)));
        assert!(ConditionOperator::Ne.evaluate(&json!("a"), &json!("b")));
        assert!(!ConditionOperator::Eq.evaluate(&json!("x"), &json!(1)));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(ConditionOperator::Gt.evaluate(&json!(0.9), &json!(0.5)));
        assert!(ConditionOperator::Lte.evaluate(&json!("2"), &json!(2)));
        assert!(!ConditionOperator::Lt.evaluate(&json!("abc"), &json!(2)));
    }

    #[test]
    fn test_collection_operators() {
        assert!(ConditionOperator::Contains.evaluate(&json!("refund please"), &json!("refund")));
        assert!(ConditionOperator::Contains.evaluate(&json!([1, 2, 3]), &json!(2)));
        assert!(ConditionOperator::Contains.evaluate(&json!({"k": 1}), &json!("k")));
        assert!(ConditionOperator::StartsWith.evaluate(&json!("urgent: x"), &json!("urgent")));
        assert!(ConditionOperator::EndsWith.evaluate(&json!("file.pdf"), &json!(".pdf")));
        assert!(ConditionOperator::IsEmpty.evaluate(&json!([]), &Value::Null));
        assert!(ConditionOperator::IsNotEmpty.evaluate(&json!("x"), &Value::Null));
    }
}
