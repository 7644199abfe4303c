//! Execution engine
//!
//! Walks a workflow graph from its entry step, one step at a time. The only
//! concurrency inside a run is a parallel step's branches.

use std::fmt::Debug;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use super::step_executor::{
    Collaborators, ExecutionScope, StepExecutor, Transition, DEFAULT_CANCELLATION_GRACE,
};
use crate::domain::{
    ExecutionContext, ExecutionId, ExecutionResult, StepResult, StreamEvent, WorkflowDefinition,
    WorkflowError,
};
use crate::infrastructure::observability::{record_execution_finished, record_execution_started};

/// Default cap on steps executed in one run
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of steps executed in one run (guards against cycles)
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// How long in-flight parallel branches may run on after cancellation
    #[serde(default = "default_cancellation_grace_ms")]
    pub cancellation_grace_ms: u64,
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_cancellation_grace_ms() -> u64 {
    DEFAULT_CANCELLATION_GRACE.as_millis() as u64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            cancellation_grace_ms: default_cancellation_grace_ms(),
        }
    }
}

impl EngineConfig {
    pub fn cancellation_grace(&self) -> Duration {
        Duration::from_millis(self.cancellation_grace_ms)
    }
}

/// Inputs for starting a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_input: Option<String>,

    /// Bindings layered over the definition's context
    #[serde(default)]
    pub context: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ExecutionRequest {
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
}

/// Receives the execution result every time it changes
#[async_trait]
pub trait ExecutionObserver: Send + Sync + Debug {
    async fn on_update(&self, result: &ExecutionResult);
}

enum Termination {
    Completed,
    Failed(WorkflowError),
    Cancelled,
}

/// Runs workflow definitions
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    executor: StepExecutor,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(collaborators: Collaborators) -> Self {
        Self::with_config(collaborators, EngineConfig::default())
    }

    pub fn with_config(collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            executor: StepExecutor::new(collaborators)
                .with_cancellation_grace(config.cancellation_grace()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate the definition, then walk it to a terminal status
    ///
    /// Only definition errors are returned as `Err`, and always before any step runs.
    /// Every other failure ends up in the returned result.
    #[instrument(
        skip(self, definition, request, scope, observer),
        fields(workflow_id = %definition.id(), execution_id = %execution_id)
    )]
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        execution_id: ExecutionId,
        request: ExecutionRequest,
        scope: &ExecutionScope,
        observer: Option<&dyn ExecutionObserver>,
    ) -> Result<ExecutionResult, WorkflowError> {
        definition.validate()?;
        definition.ensure_runnable()?;

        let workflow_id = definition.id().as_str();
        let started = Instant::now();

        let mut result = ExecutionResult::new(execution_id, definition.id().clone())
            .with_session_id(request.session_id.clone());
        let mut context = ExecutionContext::seeded(
            definition,
            &request.context,
            request.user_input.as_deref(),
            request.session_id.as_deref(),
        );

        info!(steps = definition.step_count(), "Starting workflow execution");
        record_execution_started(workflow_id);

        let mut current = definition.entry_step().map(str::to_string);
        let mut executed = 0;

        let termination = loop {
            let Some(step_id) = current.take() else {
                break Termination::Completed;
            };

            if scope.is_cancelled() {
                info!(next_step = %step_id, "Cancellation observed between steps");
                break Termination::Cancelled;
            }

            if executed >= self.config.max_steps {
                warn!(max_steps = self.config.max_steps, "Step limit reached");
                break Termination::Failed(WorkflowError::StepLimitExceeded(
                    self.config.max_steps,
                ));
            }
            executed += 1;

            let Some(step) = definition.get_step(&step_id) else {
                break Termination::Failed(WorkflowError::definition(format!(
                    "Step '{}' does not exist",
                    step_id
                )));
            };

            debug!(step_id = %step_id, "Dispatching step");
            scope.progress().emit(StreamEvent::StepStart {
                step_id: step_id.clone(),
                step_type: step.kind().type_name().to_string(),
            });

            let outcome = self.executor.execute(step, &mut context, scope).await;

            if let Some(last) = outcome.results.last() {
                scope.progress().emit(StreamEvent::StepEnd {
                    step_id: step_id.clone(),
                    status: last.status,
                    duration_ms: last.duration_ms,
                });
            }

            for step_result in outcome.results {
                append(&mut result, step_result);
            }

            if let Some(observer) = observer {
                observer.on_update(&result).await;
            }

            match outcome.transition {
                Transition::Next(next) => current = next,
                Transition::Fail(error) => break Termination::Failed(error),
                Transition::Cancelled => break Termination::Cancelled,
            }
        };

        let finished = match termination {
            Termination::Completed => result.complete(final_output(result.step_results())),
            Termination::Failed(error) => result.fail(error.to_string()),
            Termination::Cancelled => result.cancel(),
        };
        if let Err(e) = finished {
            warn!(error = %e, "Execution result already terminal");
        }

        let duration = started.elapsed();
        record_execution_finished(workflow_id, result.status(), duration);

        info!(
            status = %result.status(),
            steps = result.step_results().len(),
            duration_ms = duration.as_millis() as u64,
            "Workflow execution finished"
        );

        if let Some(observer) = observer {
            observer.on_update(&result).await;
        }

        Ok(result)
    }
}

fn append(result: &mut ExecutionResult, step_result: StepResult) {
    if let Err(e) = result.push_step(step_result) {
        warn!(error = %e, "Dropping step result appended after termination");
    }
}

/// Output of the last step that completed
fn final_output(results: &[StepResult]) -> Option<Value> {
    results
        .iter()
        .rev()
        .find(|r| r.is_completed())
        .and_then(|r| r.output.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::domain::invoker::mock::{MockAgentInvoker, MockToolInvoker};
    use crate::domain::streaming::mock::RecordingSink;
    use crate::domain::workflow::{
        AgentStep, ConditionalStep, InnerStep, LoopStep, ParallelBranch, ParallelStep,
        SuggestedAgent,
    };
    use crate::domain::{
        ExecutionStatus, InvocationContext, OnError, ProgressSink, StepKind, StepStatus,
        WorkflowId, WorkflowStep,
    };
    use crate::infrastructure::approval::InMemoryApprovalChannel;
    use crate::infrastructure::evaluator::ContextExpressionEvaluator;

    fn engine(agents: Arc<MockAgentInvoker>) -> ExecutionEngine {
        ExecutionEngine::new(Collaborators::new(
            agents,
            Arc::new(MockToolInvoker::new()),
            Arc::new(ContextExpressionEvaluator::new()),
            Arc::new(InMemoryApprovalChannel::new()),
        ))
    }

    fn agent(id: &str, agent_id: &str, input: &str) -> WorkflowStep {
        WorkflowStep::new(id, StepKind::Agent(AgentStep::new(agent_id, input)))
    }

    fn definition(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        steps.into_iter().fold(
            WorkflowDefinition::new(WorkflowId::new("test-flow").unwrap()),
            |def, step| def.with_step(step),
        )
    }

    async fn run(
        engine: &ExecutionEngine,
        definition: &WorkflowDefinition,
        request: ExecutionRequest,
    ) -> ExecutionResult {
        let execution_id = ExecutionId::generate();
        let scope = ExecutionScope::new(InvocationContext::new(execution_id.as_str()));
        engine
            .run(definition, execution_id, request, &scope, None)
            .await
            .unwrap()
    }

    fn statuses(result: &ExecutionResult) -> Vec<(String, StepStatus)> {
        result
            .step_results()
            .iter()
            .map(|r| (r.step_id.clone(), r.status))
            .collect()
    }

    #[derive(Debug, Default)]
    struct RecordingObserver {
        snapshots: Mutex<Vec<(ExecutionStatus, usize)>>,
    }

    #[async_trait]
    impl ExecutionObserver for RecordingObserver {
        async fn on_update(&self, result: &ExecutionResult) {
            self.snapshots
                .lock()
                .unwrap()
                .push((result.status(), result.step_results().len()));
        }
    }

    #[tokio::test]
    async fn test_linear_chain_threads_outputs() {
        let agents = Arc::new(
            MockAgentInvoker::new()
                .with_response("researcher", json!("facts about rust"))
                .with_response("writer", json!("an article")),
        );
        let engine = engine(agents.clone());
        let definition = definition(vec![
            agent("research", "researcher", "Research {{user_input}}").with_next("write"),
            agent("write", "writer", "Write using {{research}}"),
        ]);

        let result = run(
            &engine,
            &definition,
            ExecutionRequest::new().with_user_input("rust"),
        )
        .await;

        assert_eq!(result.status(), ExecutionStatus::Completed);
        assert_eq!(result.output(), Some(&json!("an article")));
        assert_eq!(
            statuses(&result),
            vec![
                ("research".to_string(), StepStatus::Completed),
                ("write".to_string(), StepStatus::Completed),
            ]
        );
        assert_eq!(agents.inputs("researcher"), vec!["Research rust".to_string()]);
        assert_eq!(
            agents.inputs("writer"),
            vec!["Write using facts about rust".to_string()]
        );
        assert!(result.duration_ms().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_jumps_to_handler() {
        let agents = Arc::new(
            MockAgentInvoker::new()
                .with_delay("slow", Duration::from_secs(30))
                .with_response("fallback", json!("recovered")),
        );
        let engine = engine(agents);
        let definition = definition(vec![
            agent("s1", "slow", "go")
                .with_timeout(1)
                .with_on_error(OnError::jump("s2")),
            agent("s2", "fallback", "go"),
        ]);

        let result = run(&engine, &definition, ExecutionRequest::new()).await;

        assert_eq!(result.status(), ExecutionStatus::Completed);
        assert_eq!(
            statuses(&result),
            vec![
                ("s1".to_string(), StepStatus::Failed),
                ("s2".to_string(), StepStatus::Completed),
            ]
        );
        assert_eq!(result.output(), Some(&json!("recovered")));
    }

    #[tokio::test]
    async fn test_failure_stops_the_walk() {
        let agents = Arc::new(MockAgentInvoker::new().with_failure("bad", "HTTP 500"));
        let engine = engine(agents.clone());
        let definition = definition(vec![
            agent("s1", "bad", "go").with_retries(1).with_next("s2"),
            agent("s2", "never", "go"),
        ]);

        let result = run(&engine, &definition, ExecutionRequest::new()).await;

        assert_eq!(result.status(), ExecutionStatus::Failed);
        assert_eq!(agents.call_count("bad"), 2);
        assert_eq!(agents.call_count("never"), 0);
        assert_eq!(result.step_results().len(), 1);
        assert!(result.error().unwrap().contains("HTTP 500"));
        assert!(result.output().is_none());
    }

    #[tokio::test]
    async fn test_skip_proceeds_to_successor() {
        let agents = Arc::new(MockAgentInvoker::new().with_failure("bad", "nope"));
        let engine = engine(agents);
        let definition = definition(vec![
            agent("s1", "ok", "first").with_next("s2"),
            agent("s2", "bad", "go")
                .with_on_error(OnError::Skip)
                .with_next("s3"),
            agent("s3", "ok", "third"),
        ]);

        let result = run(&engine, &definition, ExecutionRequest::new()).await;

        assert_eq!(result.status(), ExecutionStatus::Completed);
        assert_eq!(result.step_results()[1].status, StepStatus::Skipped);
        assert_eq!(result.output(), Some(&json!("third")));
    }

    #[tokio::test]
    async fn test_conditional_routing() {
        let agents = Arc::new(MockAgentInvoker::new().with_response("classifier", json!("tech")));
        let engine = engine(agents.clone());
        let definition = definition(vec![
            agent("classify", "classifier", "{{user_input}}").with_next("route"),
            WorkflowStep::new(
                "route",
                StepKind::Conditional(
                    ConditionalStep::new("{{classify}}")
                        .with_branch("billing", "billing")
                        .with_branch("tech", "tech")
                        .with_default("billing"),
                ),
            ),
            agent("billing", "billing-agent", "{{user_input}}"),
            agent("tech", "tech-agent", "{{user_input}}"),
        ]);

        let result = run(
            &engine,
            &definition,
            ExecutionRequest::new().with_user_input("my build fails"),
        )
        .await;

        assert_eq!(result.status(), ExecutionStatus::Completed);
        let order: Vec<_> = statuses(&result).into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["classify", "route", "tech"]);
        assert_eq!(agents.call_count("billing-agent"), 0);
    }

    #[tokio::test]
    async fn test_parallel_then_loop() {
        let agents = Arc::new(
            MockAgentInvoker::new()
                .with_response("a", json!(["x", "y"]))
                .with_response("b", json!(["z"])),
        );
        let engine = engine(agents);
        let definition = definition(vec![
            WorkflowStep::new(
                "gather",
                StepKind::Parallel(
                    ParallelStep::new(vec![
                        ParallelBranch::new("left", "a", "go"),
                        ParallelBranch::new("right", "b", "go"),
                    ])
                    .with_aggregation(crate::domain::workflow::Aggregation::Merge),
                ),
            )
            .with_next("each"),
            WorkflowStep::new(
                "each",
                StepKind::Loop(
                    LoopStep::foreach(
                        "{{gather}}",
                        10,
                        vec![InnerStep::agent("tag", AgentStep::new("echo", "#{{item}}"))],
                    )
                    .with_collect_results(true),
                ),
            ),
        ]);

        let result = run(&engine, &definition, ExecutionRequest::new()).await;

        assert_eq!(result.status(), ExecutionStatus::Completed);
        assert_eq!(result.output(), Some(&json!(["#x", "#y", "#z"])));
        // gather + three iterations + the loop's aggregate
        assert_eq!(result.step_results().len(), 5);
    }

    #[tokio::test]
    async fn test_cycle_hits_step_limit() {
        let engine = ExecutionEngine::with_config(
            Collaborators::new(
                Arc::new(MockAgentInvoker::new()),
                Arc::new(MockToolInvoker::new()),
                Arc::new(ContextExpressionEvaluator::new()),
                Arc::new(InMemoryApprovalChannel::new()),
            ),
            EngineConfig {
                max_steps: 5,
                ..EngineConfig::default()
            },
        );
        let definition = definition(vec![
            agent("ping", "echo", "ping").with_next("pong"),
            agent("pong", "echo", "pong").with_next("ping"),
        ]);

        let result = run(&engine, &definition, ExecutionRequest::new()).await;

        assert_eq!(result.status(), ExecutionStatus::Failed);
        assert_eq!(result.step_results().len(), 5);
        assert!(result.error().unwrap().contains("Step limit of 5"));
    }

    #[tokio::test]
    async fn test_definition_errors_surface_before_any_step() {
        let agents = Arc::new(MockAgentInvoker::new());
        let engine = engine(agents.clone());
        let execution_id = ExecutionId::generate();
        let scope = ExecutionScope::new(InvocationContext::new(execution_id.as_str()));

        let dangling = definition(vec![agent("s1", "echo", "go").with_next("ghost")]);
        let err = engine
            .run(&dangling, execution_id.clone(), ExecutionRequest::new(), &scope, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Definition(_)));

        let suggested = definition(vec![WorkflowStep::new(
            "s1",
            StepKind::Agent(AgentStep::suggested(
                SuggestedAgent {
                    name: "Invoice Parser".into(),
                    description: None,
                    capabilities: vec![],
                },
                "go",
            )),
        )]);
        let err = engine
            .run(&suggested, execution_id, ExecutionRequest::new(), &scope, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Definition(_)));

        assert_eq!(agents.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_workflow_completes() {
        let engine = engine(Arc::new(MockAgentInvoker::new()));
        let definition = definition(vec![]);

        let result = run(&engine, &definition, ExecutionRequest::new()).await;

        assert_eq!(result.status(), ExecutionStatus::Completed);
        assert!(result.step_results().is_empty());
        assert!(result.output().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_during_second_step() {
        let agents = Arc::new(
            MockAgentInvoker::new().with_delay("slow", Duration::from_millis(200)),
        );
        let engine = engine(agents.clone());
        let definition = definition(vec![
            agent("s1", "fast", "one").with_next("s2"),
            agent("s2", "slow", "two").with_next("s3"),
            agent("s3", "fast", "three").with_next("s4"),
            agent("s4", "fast", "four").with_next("s5"),
            agent("s5", "fast", "five"),
        ]);

        let execution_id = ExecutionId::generate();
        let scope = ExecutionScope::new(InvocationContext::new(execution_id.as_str()));
        let cancel: CancellationToken = scope.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let result = engine
            .run(&definition, execution_id, ExecutionRequest::new(), &scope, None)
            .await
            .unwrap();

        assert_eq!(result.status(), ExecutionStatus::Cancelled);
        let ids: Vec<_> = statuses(&result).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(agents.call_count("fast"), 1);
    }

    #[tokio::test]
    async fn test_events_and_observer() {
        let sink = RecordingSink::new();
        let observer = RecordingObserver::default();
        let engine = engine(Arc::new(MockAgentInvoker::new()));
        let definition = definition(vec![
            agent("s1", "echo", "hello").with_next("s2"),
            agent("s2", "echo", "world"),
        ]);

        let execution_id = ExecutionId::generate();
        let scope = ExecutionScope::new(InvocationContext::new(execution_id.as_str()))
            .with_progress(ProgressSink::new(sink.clone()));

        let result = engine
            .run(
                &definition,
                execution_id,
                ExecutionRequest::new(),
                &scope,
                Some(&observer),
            )
            .await
            .unwrap();

        assert_eq!(result.status(), ExecutionStatus::Completed);
        assert_eq!(
            sink.event_types(),
            vec![
                "step_start", "generating", "chunk", "step_end",
                "step_start", "generating", "chunk", "step_end",
            ]
        );
        assert_eq!(
            *observer.snapshots.lock().unwrap(),
            vec![
                (ExecutionStatus::Running, 1),
                (ExecutionStatus::Running, 2),
                (ExecutionStatus::Completed, 2),
            ]
        );
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: ExecutionRequest =
            serde_json::from_value(json!({"user_input": "hi"})).unwrap();

        assert_eq!(request.user_input.as_deref(), Some("hi"));
        assert!(request.context.is_empty());
        assert!(request.session_id.is_none());
    }
}
