//! Tool / MCP invoker trait

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::context::InvocationContext;
use super::error::InvokerError;

/// A resolved tool call
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub tool: String,
    pub payload: Value,
    pub timeout: Duration,
    pub context: InvocationContext,
}

/// Calls tools and MCP servers on behalf of `tool` steps
#[async_trait]
pub trait ToolInvoker: Send + Sync + Debug {
    async fn invoke(&self, request: ToolRequest) -> Result<Value, InvokerError>;
}
