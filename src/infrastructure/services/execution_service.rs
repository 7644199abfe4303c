//! Execution service - starts workflow runs and tracks them to completion

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    ApprovalChannel, ApprovalDecision, ApprovalRequest, DomainError, ExecutionId,
    ExecutionRepository, ExecutionResult, InvocationContext, WorkflowDefinition, WorkflowId,
    WorkflowRepository,
};
use crate::infrastructure::streaming::{EventStream, ProgressReporter, DEFAULT_EVENT_BUFFER};
use crate::infrastructure::workflow::{
    ExecutionEngine, ExecutionObserver, ExecutionRequest, ExecutionScope,
};

/// Request to start an execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartExecutionRequest {
    #[serde(default)]
    pub user_input: Option<String>,

    #[serde(default)]
    pub context: Map<String, Value>,

    #[serde(default)]
    pub session_id: Option<String>,

    /// Forwarded to collaborators, never serialized
    #[serde(skip)]
    pub credentials: Option<String>,
}

impl StartExecutionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }

    pub fn with_context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Option<String>) -> Self {
        self.credentials = credentials;
        self
    }

    fn into_parts(self) -> (ExecutionRequest, Option<String>) {
        let request = ExecutionRequest {
            user_input: self.user_input,
            context: self.context,
            session_id: self.session_id,
        };
        (request, self.credentials)
    }
}

/// Keeps the stored snapshot in step with the running execution
struct RepositoryObserver {
    executions: Arc<dyn ExecutionRepository>,
}

impl std::fmt::Debug for RepositoryObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryObserver").finish_non_exhaustive()
    }
}

#[async_trait]
impl ExecutionObserver for RepositoryObserver {
    async fn on_update(&self, result: &ExecutionResult) {
        if let Err(e) = self.executions.update(result.clone()).await {
            warn!(
                execution_id = %result.execution_id(),
                error = %e,
                "Failed to store execution snapshot"
            );
        }
    }
}

struct RunningExecution {
    cancel: CancellationToken,
    done: watch::Receiver<Option<ExecutionResult>>,
}

type RunningMap = Arc<Mutex<HashMap<String, RunningExecution>>>;

fn lock(running: &RunningMap) -> std::sync::MutexGuard<'_, HashMap<String, RunningExecution>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Execution service for starting, observing and steering runs
pub struct ExecutionService {
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    approvals: Arc<dyn ApprovalChannel>,
    engine: Arc<ExecutionEngine>,
    running: RunningMap,
}

impl std::fmt::Debug for ExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionService")
            .field("running", &lock(&self.running).len())
            .finish()
    }
}

impl ExecutionService {
    /// `approvals` must be the same channel the engine's collaborators wait on
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        executions: Arc<dyn ExecutionRepository>,
        approvals: Arc<dyn ApprovalChannel>,
        engine: Arc<ExecutionEngine>,
    ) -> Self {
        Self {
            workflows,
            executions,
            approvals,
            engine,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start an execution in the background and return its id
    #[instrument(skip(self, request), fields(workflow_id = %workflow_id))]
    pub async fn start(
        &self,
        workflow_id: &str,
        request: StartExecutionRequest,
    ) -> Result<ExecutionId, DomainError> {
        self.launch(workflow_id, request, None).await
    }

    /// Start an execution whose progress is streamed to the returned listener
    ///
    /// Dropping the stream aborts in-flight collaborator calls.
    #[instrument(skip(self, request), fields(workflow_id = %workflow_id))]
    pub async fn start_streaming(
        &self,
        workflow_id: &str,
        request: StartExecutionRequest,
    ) -> Result<(ExecutionId, EventStream), DomainError> {
        let (reporter, stream) = ProgressReporter::channel(DEFAULT_EVENT_BUFFER);
        let execution_id = self.launch(workflow_id, request, Some(reporter)).await?;
        Ok((execution_id, stream))
    }

    async fn launch(
        &self,
        workflow_id: &str,
        request: StartExecutionRequest,
        reporter: Option<ProgressReporter>,
    ) -> Result<ExecutionId, DomainError> {
        let definition = self.runnable_definition(workflow_id).await?;

        let execution_id = ExecutionId::generate();
        let (request, credentials) = request.into_parts();

        let initial = ExecutionResult::new(execution_id.clone(), definition.id().clone())
            .with_session_id(request.session_id.clone());
        self.executions.create(initial).await?;

        let invocation = InvocationContext::new(execution_id.as_str())
            .with_session_id(request.session_id.clone())
            .with_credentials(credentials);
        let mut scope = ExecutionScope::new(invocation);
        if let Some(reporter) = &reporter {
            scope = scope
                .with_progress(reporter.progress())
                .with_abort(reporter.abort_token());
        }

        let (done_tx, done_rx) = watch::channel(None);
        lock(&self.running).insert(
            execution_id.as_str().to_string(),
            RunningExecution {
                cancel: scope.cancel_token().clone(),
                done: done_rx,
            },
        );

        let engine = self.engine.clone();
        let executions = self.executions.clone();
        let running = self.running.clone();
        let id = execution_id.clone();

        tokio::spawn(async move {
            let observer = RepositoryObserver {
                executions: executions.clone(),
            };

            let outcome = engine
                .run(&definition, id.clone(), request, &scope, Some(&observer))
                .await;

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    error!(execution_id = %id, error = %e, "Execution rejected by the engine");
                    let mut failed = ExecutionResult::new(id.clone(), definition.id().clone());
                    if let Err(e) = failed.fail(e.to_string()) {
                        warn!(error = %e, "Could not mark execution as failed");
                    }
                    observer.on_update(&failed).await;
                    failed
                }
            };

            if let Some(reporter) = reporter {
                reporter.finish_ok(&result).await;
            }

            lock(&running).remove(id.as_str());
            // Nobody waiting is fine
            let _ = done_tx.send(Some(result));
        });

        info!(execution_id = %execution_id, "Execution started");
        Ok(execution_id)
    }

    async fn runnable_definition(&self, workflow_id: &str) -> Result<WorkflowDefinition, DomainError> {
        let id = WorkflowId::new(workflow_id)?;
        let definition = self
            .workflows
            .get(&id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Workflow '{}' not found", id)))?;

        definition.validate()?;
        definition.ensure_runnable()?;
        Ok(definition)
    }

    /// Current snapshot of an execution, partial while it is running
    pub async fn status(&self, execution_id: &str) -> Result<ExecutionResult, DomainError> {
        let id = ExecutionId::new(execution_id)?;
        self.executions
            .get(&id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Execution '{}' not found", id)))
    }

    /// List executions, optionally restricted to one workflow
    pub async fn list(&self, workflow_id: Option<&str>) -> Result<Vec<ExecutionResult>, DomainError> {
        match workflow_id {
            Some(workflow_id) => {
                let id = WorkflowId::new(workflow_id)?;
                self.executions.list_by_workflow(&id).await
            }
            None => self.executions.list().await,
        }
    }

    pub fn is_running(&self, execution_id: &str) -> bool {
        lock(&self.running).contains_key(execution_id)
    }

    /// Request cooperative cancellation
    ///
    /// The run stops at the next step or loop-iteration boundary.
    #[instrument(skip(self))]
    pub async fn cancel(&self, execution_id: &str) -> Result<(), DomainError> {
        let token = lock(&self.running)
            .get(execution_id)
            .map(|running| running.cancel.clone());

        match token {
            Some(token) => {
                token.cancel();
                info!("Cancellation requested");
                Ok(())
            }
            None => {
                let result = self.status(execution_id).await?;
                Err(DomainError::conflict(format!(
                    "Execution '{}' already finished as {}",
                    execution_id,
                    result.status()
                )))
            }
        }
    }

    /// Record one approver's decision on an execution's approval step
    #[instrument(skip(self, reason))]
    pub async fn submit_approval(
        &self,
        execution_id: &str,
        step_id: &str,
        approver: &str,
        decision: ApprovalDecision,
        reason: Option<String>,
    ) -> Result<(), DomainError> {
        if !self.is_running(execution_id) {
            self.status(execution_id).await?;
            return Err(DomainError::conflict(format!(
                "Execution '{}' is not running",
                execution_id
            )));
        }

        let approval_id = ApprovalRequest::approval_id_for(execution_id, step_id);
        self.approvals
            .submit(&approval_id, approver, decision, reason)
            .await?;

        debug!(approval_id = %approval_id, "Approval decision recorded");
        Ok(())
    }

    /// Wait for an execution to reach a terminal status
    pub async fn wait(&self, execution_id: &str) -> Result<ExecutionResult, DomainError> {
        let done = lock(&self.running)
            .get(execution_id)
            .map(|running| running.done.clone());

        let Some(mut done) = done else {
            return self.status(execution_id).await;
        };

        let finished = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| DomainError::internal("Execution task ended without a result"))?
            .clone();

        match finished {
            Some(result) => Ok(result),
            None => self.status(execution_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;
    use serde_json::json;

    use crate::domain::invoker::mock::{MockAgentInvoker, MockToolInvoker};
    use crate::domain::workflow::{AgentStep, ApprovalStep, SuggestedAgent};
    use crate::domain::{ExecutionStatus, StepKind, StepStatus, StreamEvent, WorkflowStep};
    use crate::infrastructure::approval::InMemoryApprovalChannel;
    use crate::infrastructure::evaluator::ContextExpressionEvaluator;
    use crate::infrastructure::execution::InMemoryExecutionRepository;
    use crate::infrastructure::workflow::{Collaborators, InMemoryWorkflowRepository};

    #[tokio::test]
    async fn test_repository_observer_stores_snapshots() {
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let id = ExecutionId::generate();
        let workflow_id = WorkflowId::new("flow").unwrap();
        executions
            .create(ExecutionResult::new(id.clone(), workflow_id.clone()))
            .await
            .unwrap();

        let observer: &dyn ExecutionObserver = &RepositoryObserver {
            executions: executions.clone(),
        };
        assert!(format!("{:?}", observer).starts_with("RepositoryObserver"));

        let mut snapshot = ExecutionResult::new(id.clone(), workflow_id);
        snapshot
            .push_step(crate::domain::StepResult::completed("draft", json!("text")))
            .unwrap();
        observer.on_update(&snapshot).await;

        let stored = executions.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.step_results().len(), 1);
    }

    struct Fixture {
        service: ExecutionService,
        agents: Arc<MockAgentInvoker>,
        approvals: Arc<InMemoryApprovalChannel>,
    }

    fn fixture(agents: MockAgentInvoker, definitions: Vec<WorkflowDefinition>) -> Fixture {
        let agents = Arc::new(agents);
        let approvals = Arc::new(InMemoryApprovalChannel::new());
        let engine = ExecutionEngine::new(Collaborators::new(
            agents.clone(),
            Arc::new(MockToolInvoker::new()),
            Arc::new(ContextExpressionEvaluator::new()),
            approvals.clone(),
        ));

        let service = ExecutionService::new(
            Arc::new(InMemoryWorkflowRepository::with_definitions(definitions)),
            Arc::new(InMemoryExecutionRepository::new()),
            approvals.clone(),
            Arc::new(engine),
        );

        Fixture {
            service,
            agents,
            approvals,
        }
    }

    fn agent(id: &str, agent_id: &str, input: &str) -> WorkflowStep {
        WorkflowStep::new(id, StepKind::Agent(AgentStep::new(agent_id, input)))
    }

    fn two_step_flow() -> WorkflowDefinition {
        WorkflowDefinition::new(WorkflowId::new("flow").unwrap())
            .with_step(agent("draft", "writer", "{{user_input}}").with_next("review"))
            .with_step(agent("review", "reviewer", "Review: {{draft}}"))
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let f = fixture(
            MockAgentInvoker::new().with_response("writer", json!("Draft")),
            vec![two_step_flow()],
        );

        let id = f
            .service
            .start(
                "flow",
                StartExecutionRequest::new()
                    .with_user_input("Write")
                    .with_session_id("sess-1"),
            )
            .await
            .unwrap();

        let result = f.service.wait(id.as_str()).await.unwrap();
        assert_eq!(result.status(), ExecutionStatus::Completed);
        assert_eq!(result.output(), Some(&json!("Review: Draft")));
        assert_eq!(result.session_id(), Some("sess-1"));

        let stored = f.service.status(id.as_str()).await.unwrap();
        assert_eq!(stored.status(), ExecutionStatus::Completed);
        assert_eq!(stored.step_results().len(), 2);
        assert!(!f.service.is_running(id.as_str()));

        // Waiting on a finished execution reads the stored snapshot
        let again = f.service.wait(id.as_str()).await.unwrap();
        assert_eq!(again.status(), ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_unknown_workflow() {
        let f = fixture(MockAgentInvoker::new(), vec![]);

        let result = f.service.start("ghost", StartExecutionRequest::new()).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_start_rejects_placeholder_agents() {
        let definition = WorkflowDefinition::new(WorkflowId::new("draft").unwrap()).with_step(
            WorkflowStep::new(
                "parse",
                StepKind::Agent(AgentStep::suggested(
                    SuggestedAgent {
                        name: "Invoice Parser".to_string(),
                        description: None,
                        capabilities: vec![],
                    },
                    "{{user_input}}",
                )),
            ),
        );
        let f = fixture(MockAgentInvoker::new(), vec![definition]);

        let result = f.service.start("draft", StartExecutionRequest::new()).await;
        assert!(matches!(result, Err(DomainError::Definition { .. })));
        assert!(f.service.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_step() {
        let f = fixture(
            MockAgentInvoker::new().with_delay("writer", Duration::from_millis(200)),
            vec![two_step_flow()],
        );

        let id = f
            .service
            .start("flow", StartExecutionRequest::new().with_user_input("Write"))
            .await
            .unwrap();
        f.service.cancel(id.as_str()).await.unwrap();

        let result = f.service.wait(id.as_str()).await.unwrap();
        assert_eq!(result.status(), ExecutionStatus::Cancelled);
        assert_eq!(f.agents.call_count("reviewer"), 0);

        let again = f.service.cancel(id.as_str()).await;
        assert!(matches!(again, Err(DomainError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_cancel_unknown_execution() {
        let f = fixture(MockAgentInvoker::new(), vec![]);

        let unknown = ExecutionId::generate();
        let result = f.service.cancel(unknown.as_str()).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));

        let malformed = f.service.status("missing").await;
        assert!(matches!(malformed, Err(DomainError::InvalidId { .. })));
    }

    #[tokio::test]
    async fn test_approval_round_trip() {
        let definition = WorkflowDefinition::new(WorkflowId::new("gated").unwrap())
            .with_step(
                WorkflowStep::new(
                    "gate",
                    StepKind::Approval(ApprovalStep::new(
                        "Publish {{user_input}}?",
                        vec!["alice".to_string(), "bob".to_string()],
                    )),
                )
                .with_next("publish"),
            )
            .with_step(agent("publish", "publisher", "Publishing {{user_input}}"));
        let f = fixture(MockAgentInvoker::new(), vec![definition]);

        let id = f
            .service
            .start("gated", StartExecutionRequest::new().with_user_input("post"))
            .await
            .unwrap();

        let approval_id = ApprovalRequest::approval_id_for(id.as_str(), "gate");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !f.approvals.is_pending(&approval_id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let snapshot = f.service.status(id.as_str()).await.unwrap();
        assert_eq!(snapshot.status(), ExecutionStatus::Running);

        let outsider = f
            .service
            .submit_approval(id.as_str(), "gate", "mallory", ApprovalDecision::Approve, None)
            .await;
        assert!(matches!(outsider, Err(DomainError::Validation { .. })));

        f.service
            .submit_approval(id.as_str(), "gate", "bob", ApprovalDecision::Approve, None)
            .await
            .unwrap();

        let result = f.service.wait(id.as_str()).await.unwrap();
        assert_eq!(result.status(), ExecutionStatus::Completed);
        assert_eq!(result.step_results()[0].status, StepStatus::Completed);
        assert_eq!(f.agents.inputs("publisher"), vec!["Publishing post"]);

        let late = f
            .service
            .submit_approval(id.as_str(), "gate", "alice", ApprovalDecision::Approve, None)
            .await;
        assert!(matches!(late, Err(DomainError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_streaming_execution() {
        let f = fixture(
            MockAgentInvoker::new().with_response("writer", json!("Draft")),
            vec![two_step_flow()],
        );

        let (id, stream) = f
            .service
            .start_streaming("flow", StartExecutionRequest::new().with_user_input("Write"))
            .await
            .unwrap();

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Complete {
                execution_id: id.to_string(),
                status: ExecutionStatus::Completed,
                output: Some(json!("Review: Draft")),
            })
        );
        assert!(events.iter().any(|e| e.event_type() == "chunk"));
    }

    #[tokio::test]
    async fn test_dropping_stream_aborts_inflight_call() {
        let f = fixture(
            MockAgentInvoker::new().with_delay("writer", Duration::from_secs(30)),
            vec![two_step_flow()],
        );

        let (id, stream) = f
            .service
            .start_streaming("flow", StartExecutionRequest::new().with_user_input("Write"))
            .await
            .unwrap();
        drop(stream);

        let result = tokio::time::timeout(Duration::from_secs(5), f.service.wait(id.as_str()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status(), ExecutionStatus::Cancelled);
        assert_eq!(f.agents.call_count("reviewer"), 0);
    }

    #[tokio::test]
    async fn test_list_by_workflow() {
        let f = fixture(MockAgentInvoker::new(), vec![two_step_flow()]);

        let id = f.service.start("flow", StartExecutionRequest::new()).await.unwrap();
        f.service.wait(id.as_str()).await.unwrap();

        assert_eq!(f.service.list(Some("flow")).await.unwrap().len(), 1);
        assert!(f.service.list(Some("other")).await.unwrap().is_empty());
    }

    #[test]
    fn test_request_never_serializes_credentials() {
        let request = StartExecutionRequest::new()
            .with_user_input("hi")
            .with_credentials(Some("secret".to_string()));

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("credentials").is_none());
        assert_eq!(value["user_input"], json!("hi"));
    }
}
