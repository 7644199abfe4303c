//! Execution context and template resolution
//!
//! Templates reference bound variables with `{{name}}`. A dotted path walks into objects
//! and arrays, e.g. `{{search.documents.0.title}}`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::entity::WorkflowDefinition;
use super::error::WorkflowError;

/// Placeholder pattern: `{{ path }}` with optional surrounding whitespace
static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_][a-zA-Z0-9_.-]*)\s*\}\}").unwrap());

/// Binding name for the request's user input
pub const USER_INPUT_VAR: &str = "user_input";

/// Binding name for the request's session id
pub const SESSION_ID_VAR: &str = "session_id";

/// Variable bindings accumulated over one execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    variables: Map<String, Value>,
}

impl ExecutionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context for a run
    ///
    /// Later sources win: definition context, then request context, then `user_input`
    /// and `session_id`.
    pub fn seeded(
        definition: &WorkflowDefinition,
        request_context: &Map<String, Value>,
        user_input: Option<&str>,
        session_id: Option<&str>,
    ) -> Self {
        let mut variables = definition.context().clone();

        for (key, value) in request_context {
            variables.insert(key.clone(), value.clone());
        }

        if let Some(input) = user_input {
            variables.insert(USER_INPUT_VAR.to_string(), Value::String(input.to_string()));
        }

        if let Some(session) = session_id {
            variables.insert(SESSION_ID_VAR.to_string(), Value::String(session.to_string()));
        }

        Self { variables }
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Bind a value, replacing any previous binding
    pub fn bind(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn unbind(&mut self, key: &str) -> Option<Value> {
        self.variables.remove(key)
    }

    /// Look up a dotted path
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let root = parts.next()?;
        let mut current = self.variables.get(root)?;

        for part in parts {
            current = match current {
                Value::Object(obj) => obj.get(part)?,
                Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        Some(current)
    }

    /// Substitute every placeholder in a template
    pub fn resolve_template(&self, template: &str) -> Result<String, WorkflowError> {
        let mut result = String::with_capacity(template.len());
        let mut last = 0;

        for caps in PLACEHOLDER_PATTERN.captures_iter(template) {
            let Some(full_match) = caps.get(0) else {
                continue;
            };
            let path = &caps[1];

            let value = self.lookup(path).ok_or_else(|| {
                WorkflowError::input_resolution(format!("Unresolved variable '{}'", path))
            })?;

            result.push_str(&template[last..full_match.start()]);
            result.push_str(&value_to_string(value));
            last = full_match.end();
        }

        result.push_str(&template[last..]);
        Ok(result)
    }

    /// Resolve templates at every string leaf of a payload
    ///
    /// A string that is exactly one placeholder resolves to the bound value itself,
    /// keeping its JSON type.
    pub fn resolve_value(&self, value: &Value) -> Result<Value, WorkflowError> {
        match value {
            Value::String(s) => {
                if let Some(path) = sole_placeholder(s) {
                    return self.lookup(path).cloned().ok_or_else(|| {
                        WorkflowError::input_resolution(format!("Unresolved variable '{}'", path))
                    });
                }
                Ok(Value::String(self.resolve_template(s)?))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(obj) => {
                let mut resolved = Map::with_capacity(obj.len());
                for (key, item) in obj {
                    resolved.insert(key.clone(), self.resolve_value(item)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Check if a string contains any placeholder
    pub fn has_variables(template: &str) -> bool {
        PLACEHOLDER_PATTERN.is_match(template)
    }

    /// Paths referenced by a template, in order of appearance
    pub fn extract_variables(template: &str) -> Vec<String> {
        PLACEHOLDER_PATTERN
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .collect()
    }
}

/// The path when the whole string is a single placeholder
pub(crate) fn sole_placeholder(s: &str) -> Option<&str> {
    let caps = PLACEHOLDER_PATTERN.captures(s.trim())?;
    let full_match = caps.get(0)?;
    if full_match.as_str().len() == s.trim().len() {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

/// Render a bound value for string interpolation
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),

        // Arrays and objects interpolate as JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::entity::WorkflowId;
    use serde_json::json;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.bind("name", json!("Alice"));
        ctx.bind(
            "search",
            json!({
                "documents": [
                    {"id": 1, "text": "First doc"},
                    {"id": 2, "text": "Second doc"}
                ],
                "count": 2
            }),
        );
        ctx
    }

    #[test]
    fn test_seeding_order() {
        let definition = WorkflowDefinition::new(WorkflowId::new("seed").unwrap())
            .with_context_value("tone", json!("formal"))
            .with_context_value("user_input", json!("from definition"));

        let mut request = Map::new();
        request.insert("tone".to_string(), json!("casual"));
        request.insert("locale".to_string(), json!("en"));

        let ctx = ExecutionContext::seeded(&definition, &request, Some("hello"), Some("sess-1"));

        assert_eq!(ctx.lookup("tone"), Some(&json!("casual")));
        assert_eq!(ctx.lookup("locale"), Some(&json!("en")));
        assert_eq!(ctx.lookup("user_input"), Some(&json!("hello")));
        assert_eq!(ctx.lookup("session_id"), Some(&json!("sess-1")));
    }

    #[test]
    fn test_lookup_nested() {
        let ctx = context();

        assert_eq!(ctx.lookup("search.count"), Some(&json!(2)));
        assert_eq!(ctx.lookup("search.documents.1.text"), Some(&json!("Second doc")));
        assert!(ctx.lookup("search.documents.9").is_none());
        assert!(ctx.lookup("name.first").is_none());
        assert!(ctx.lookup("missing").is_none());
    }

    #[test]
    fn test_resolve_template() {
        let ctx = context();

        let result = ctx
            .resolve_template("Hello, {{name}}! Found {{ search.count }} docs.")
            .unwrap();
        assert_eq!(result, "Hello, Alice! Found 2 docs.");

        assert_eq!(ctx.resolve_template("No variables here").unwrap(), "No variables here");
    }

    #[test]
    fn test_resolve_template_object_renders_as_json() {
        let mut ctx = ExecutionContext::new();
        ctx.bind("data", json!({"a": 1}));

        assert_eq!(ctx.resolve_template("Data: {{data}}").unwrap(), "Data: {\"a\":1}");
    }

    #[test]
    fn test_unresolved_placeholder() {
        let ctx = context();

        let err = ctx.resolve_template("Hi {{nobody}}").unwrap_err();
        assert_eq!(err, WorkflowError::input_resolution("Unresolved variable 'nobody'"));
    }

    #[test]
    fn test_resolve_value_keeps_types_for_sole_placeholders() {
        let ctx = context();

        let payload = json!({
            "to": "{{name}}",
            "docs": "{{search.documents}}",
            "subject": "Report for {{name}}",
            "limit": 5,
            "tags": ["{{search.count}}", "static"]
        });

        let resolved = ctx.resolve_value(&payload).unwrap();
        assert_eq!(resolved["to"], json!("Alice"));
        assert_eq!(resolved["docs"][0]["id"], json!(1));
        assert_eq!(resolved["subject"], json!("Report for Alice"));
        assert_eq!(resolved["limit"], json!(5));
        assert_eq!(resolved["tags"], json!([2, "static"]));
    }

    #[test]
    fn test_resolve_value_unresolved() {
        let ctx = context();
        assert!(ctx.resolve_value(&json!({"x": ["{{missing}}"]})).is_err());
    }

    #[test]
    fn test_extract_variables() {
        let vars = ExecutionContext::extract_variables("{{a}} and {{ b.c }} then {{a}}");
        assert_eq!(vars, vec!["a", "b.c", "a"]);

        assert!(ExecutionContext::has_variables("x {{y}}"));
        assert!(!ExecutionContext::has_variables("{not} a {{ }} variable"));
    }
}
