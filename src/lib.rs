//! PMP Workflow Engine
//!
//! Executes declarative step graphs on behalf of callers:
//! - Agent, tool, parallel, conditional, loop and approval steps
//! - Per-step retries, timeouts and `on_error` routing
//! - Cooperative cancellation with a grace period
//! - Live progress events streamed over SSE

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;
use std::time::Duration;

use api::state::AppState;
use domain::AgentInvoker;
use infrastructure::{
    approval::InMemoryApprovalChannel,
    evaluator::ContextExpressionEvaluator,
    execution::InMemoryExecutionRepository,
    invoker::{AgentBranchRanker, HttpAgentInvoker, HttpToolInvoker},
    services::{ExecutionService, WorkflowService},
    workflow::{Collaborators, ExecutionEngine, InMemoryWorkflowRepository},
};

/// Wire services, engine and collaborators from configuration
pub fn create_app_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let agents: Arc<dyn AgentInvoker> =
        Arc::new(HttpAgentInvoker::new(&config.invokers.agent_base_url));
    let tools = Arc::new(HttpToolInvoker::new(&config.invokers.tool_base_url));
    let approvals = Arc::new(InMemoryApprovalChannel::new());

    let mut collaborators = Collaborators::new(
        agents.clone(),
        tools,
        Arc::new(ContextExpressionEvaluator::new()),
        approvals.clone(),
    );

    if let Some(judge) = &config.invokers.ranker_agent {
        tracing::info!(agent_id = %judge, "Using agent branch ranker");
        collaborators = collaborators.with_ranker(Arc::new(
            AgentBranchRanker::new(agents, judge.as_str())
                .with_timeout(Duration::from_secs(config.invokers.ranker_timeout_secs)),
        ));
    }

    let engine = ExecutionEngine::with_config(collaborators, config.engine.clone());

    let workflows = Arc::new(InMemoryWorkflowRepository::new());
    let executions = Arc::new(InMemoryExecutionRepository::with_max_executions(
        config.workflows.max_executions,
    ));

    Ok(AppState::new(
        Arc::new(WorkflowService::new(workflows.clone())),
        Arc::new(ExecutionService::new(
            workflows,
            executions,
            approvals,
            Arc::new(engine),
        )),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_app_state_from_defaults() {
        let state = create_app_state(&AppConfig::default()).unwrap();

        assert!(state.workflow_service.list().await.unwrap().is_empty());
        assert!(state.execution_service.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_app_state_with_ranker() {
        let mut config = AppConfig::default();
        config.invokers.ranker_agent = Some("judge".to_string());

        assert!(create_app_state(&config).is_ok());
    }
}
