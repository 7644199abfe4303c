//! Step executor
//!
//! Interprets one workflow step against the run-time context and decides where the
//! walk goes next. Collaborator failures never escape: they are folded into the step's
//! result and a [`Transition`] according to the step's `on_error` policy.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::aggregation::{aggregate, BranchOutcome, DefaultMergeStrategy};
use crate::domain::workflow::{
    AgentRef, AgentStep, ApprovalStep, ConditionalStep, InnerStep, InnerStepKind, LoopMode,
    LoopStep, ParallelStep, ToolStep,
};
use crate::domain::{
    AgentInvoker, AgentRequest, ApprovalChannel, ApprovalOutcome, ApprovalRequest, BranchRanker,
    EvaluationOutcome, ExecutionContext, ExpressionEvaluator, InvocationContext, InvokerError,
    MergeStrategy, OnError, ProgressSink, StepKind, StepResult, StepStatus, StreamEvent,
    ToolInvoker, ToolRequest, WorkflowError, WorkflowStep,
};
use crate::infrastructure::observability::{record_step, record_step_retry};

/// Default time parallel branches get to finish after cancellation
pub const DEFAULT_CANCELLATION_GRACE: Duration = Duration::from_secs(5);

/// External collaborators a step may call out to
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub agents: Arc<dyn AgentInvoker>,
    pub tools: Arc<dyn ToolInvoker>,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub approvals: Arc<dyn ApprovalChannel>,
    /// Picks the winner for `best` aggregation
    pub ranker: Option<Arc<dyn BranchRanker>>,
    pub merge: Arc<dyn MergeStrategy>,
}

impl Collaborators {
    pub fn new(
        agents: Arc<dyn AgentInvoker>,
        tools: Arc<dyn ToolInvoker>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        approvals: Arc<dyn ApprovalChannel>,
    ) -> Self {
        Self {
            agents,
            tools,
            evaluator,
            approvals,
            ranker: None,
            merge: Arc::new(DefaultMergeStrategy),
        }
    }

    pub fn with_ranker(mut self, ranker: Arc<dyn BranchRanker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    pub fn with_merge_strategy(mut self, merge: Arc<dyn MergeStrategy>) -> Self {
        self.merge = merge;
        self
    }
}

/// Per-execution handles shared by every step of one run
///
/// `cancel` is the cooperative signal checked at step and iteration boundaries.
/// `abort` is its parent: firing it also interrupts in-flight agent and tool calls.
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    invocation: InvocationContext,
    abort: CancellationToken,
    cancel: CancellationToken,
    progress: ProgressSink,
}

impl ExecutionScope {
    pub fn new(invocation: InvocationContext) -> Self {
        let abort = CancellationToken::new();
        let cancel = abort.child_token();

        Self {
            invocation,
            abort,
            cancel,
            progress: ProgressSink::noop(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Use an externally owned abort token
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.cancel = abort.child_token();
        self.abort = abort;
        self
    }

    pub fn invocation(&self) -> &InvocationContext {
        &self.invocation
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Where the walk goes after a step
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Continue with the given step, or finish when `None`
    Next(Option<String>),

    /// Finish the execution as FAILED
    Fail(WorkflowError),

    /// Finish the execution as CANCELLED
    Cancelled,
}

/// Results a step produced, in order, plus the transition
///
/// Loop steps produce one result per iteration followed by the aggregate result.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub results: Vec<StepResult>,
    pub transition: Transition,
}

impl StepOutcome {
    /// The step's own (last) result
    pub fn result(&self) -> Option<&StepResult> {
        self.results.last()
    }
}

/// A step's raw outcome before `on_error` is applied
struct Finished {
    outcome: Result<Value, WorkflowError>,
    next: Option<String>,
    /// Overrides the step's `on_error`
    policy: Option<OnError>,
    preceding: Vec<StepResult>,
    metadata: Map<String, Value>,
}

impl Finished {
    fn new(outcome: Result<Value, WorkflowError>, next: Option<String>) -> Self {
        Self {
            outcome,
            next,
            policy: None,
            preceding: Vec::new(),
            metadata: Map::new(),
        }
    }

    fn with_attempts(mut self, attempts: u32) -> Self {
        if attempts > 1 {
            self.metadata.insert("attempts".to_string(), json!(attempts));
        }
        self
    }

    fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

enum InnerOutput {
    Value(Value),
    Branch { label: String, target: String },
}

/// Executes single workflow steps
#[derive(Debug, Clone)]
pub struct StepExecutor {
    collaborators: Collaborators,
    cancellation_grace: Duration,
}

impl StepExecutor {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            cancellation_grace: DEFAULT_CANCELLATION_GRACE,
        }
    }

    pub fn with_cancellation_grace(mut self, grace: Duration) -> Self {
        self.cancellation_grace = grace;
        self
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Run one step, bind its output and decide the next step
    #[instrument(
        skip(self, step, context, scope),
        fields(step_id = %step.id(), step_type = step.kind().type_name())
    )]
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        context: &mut ExecutionContext,
        scope: &ExecutionScope,
    ) -> StepOutcome {
        let started = Instant::now();
        let step_id = step.id();
        let step_type = step.kind().type_name();
        let next = step.next().map(str::to_string);

        let finished = match step.kind() {
            StepKind::Agent(agent) => {
                let ctx: &ExecutionContext = context;
                let (outcome, attempts) =
                    with_retries(step_id, step_type, step.retries(), &scope.cancel, move || {
                        self.run_agent(step_id, agent, step.timeout(), ctx, scope)
                    })
                    .await;
                Finished::new(outcome, next).with_attempts(attempts)
            }

            StepKind::Tool(tool) => {
                let ctx: &ExecutionContext = context;
                let (outcome, attempts) =
                    with_retries(step_id, step_type, step.retries(), &scope.cancel, move || {
                        self.run_tool(step_id, tool, step.timeout(), ctx, scope)
                    })
                    .await;
                Finished::new(outcome, next).with_attempts(attempts)
            }

            StepKind::Parallel(parallel) => {
                let ctx: &ExecutionContext = context;
                let (outcome, attempts) =
                    with_retries(step_id, step_type, step.retries(), &scope.cancel, move || {
                        self.run_parallel(step_id, parallel, ctx, scope)
                    })
                    .await;

                match outcome {
                    Ok((output, branches)) => {
                        Finished::new(Ok(output), next).with_metadata("branches", branches)
                    }
                    Err(e) => Finished::new(Err(e), next),
                }
                .with_attempts(attempts)
            }

            StepKind::Conditional(conditional) => {
                match self
                    .evaluate_conditional(step_id, conditional, step.timeout(), context)
                    .await
                {
                    Ok((label, target)) => Finished::new(Ok(Value::String(label)), Some(target)),
                    Err(e) => Finished::new(Err(e), next),
                }
            }

            StepKind::Loop(spec) => {
                let mut iterations = Vec::new();
                let outcome = self
                    .run_loop(step_id, spec, step.timeout(), context, scope, &mut iterations)
                    .await;
                let count = iterations.iter().filter(|r| r.is_completed()).count();

                let mut finished =
                    Finished::new(outcome, next).with_metadata("iterations", json!(count));
                finished.preceding = iterations;
                finished
            }

            StepKind::Approval(approval) => {
                let mut metadata = Map::new();
                let outcome = self
                    .run_approval(step_id, approval, context, scope, &mut metadata)
                    .await;
                let rejected = matches!(outcome, Err(WorkflowError::ApprovalRejected { .. }));

                let mut finished = Finished::new(outcome, next);
                finished.metadata = metadata;
                if rejected {
                    finished.policy = Some(approval.on_reject.clone());
                }
                finished
            }
        };

        self.conclude(step, finished, context, scope, started)
    }

    /// Apply the failure policy, bind the output and build the step result
    fn conclude(
        &self,
        step: &WorkflowStep,
        finished: Finished,
        context: &mut ExecutionContext,
        scope: &ExecutionScope,
        started: Instant,
    ) -> StepOutcome {
        let duration = started.elapsed();
        let Finished {
            outcome,
            next,
            policy,
            mut preceding,
            metadata,
        } = finished;

        let (result, transition) = match outcome {
            Ok(output) => {
                context.bind(step.id(), output.clone());
                (StepResult::completed(step.id(), output), Transition::Next(next))
            }
            Err(error @ WorkflowError::Aborted(_)) if scope.is_cancelled() => {
                info!(step_id = step.id(), "Step interrupted by cancellation");
                (
                    StepResult::failed(step.id(), error.to_string())
                        .with_metadata("error_kind", json!(error.kind())),
                    Transition::Cancelled,
                )
            }
            Err(error) => {
                let policy = policy.unwrap_or_else(|| step.on_error().clone());
                warn!(step_id = step.id(), error = %error, policy = ?policy, "Step failed");

                let message = error.to_string();
                let result = match policy {
                    OnError::Skip => StepResult::skipped(step.id(), Some(message)),
                    _ => StepResult::failed(step.id(), message),
                }
                .with_metadata("error_kind", json!(error.kind()));

                let transition = match policy {
                    OnError::Fail => Transition::Fail(error),
                    OnError::Skip => Transition::Next(next),
                    OnError::Jump(target) => Transition::Next(Some(target)),
                };

                (result, transition)
            }
        };

        let mut result = result
            .with_name(step.name())
            .with_duration_ms(duration.as_millis() as u64);
        result.metadata.extend(metadata);

        record_step(step.kind().type_name(), result.status, duration);
        preceding.push(result);

        StepOutcome {
            results: preceding,
            transition,
        }
    }

    async fn run_agent(
        &self,
        step_id: &str,
        agent: &AgentStep,
        timeout_secs: u64,
        context: &ExecutionContext,
        scope: &ExecutionScope,
    ) -> Result<Value, WorkflowError> {
        let agent_id = runnable_agent(step_id, &agent.agent)?;
        let input = context.resolve_template(&agent.input)?;

        debug!(step_id, agent_id, "Invoking agent");

        call_agent(
            self.collaborators.agents.as_ref(),
            step_id,
            agent_id,
            input,
            timeout_secs,
            scope,
            &scope.progress.for_step(step_id),
        )
        .await
    }

    async fn run_tool(
        &self,
        step_id: &str,
        tool: &ToolStep,
        timeout_secs: u64,
        context: &ExecutionContext,
        scope: &ExecutionScope,
    ) -> Result<Value, WorkflowError> {
        let payload = context.resolve_value(&tool.input)?;
        let progress = scope.progress.for_step(step_id);
        let timeout = Duration::from_secs(timeout_secs);

        debug!(step_id, tool = %tool.tool, "Invoking tool");
        progress.tool_start(&tool.tool, Some(payload.clone()));

        let request = ToolRequest {
            tool: tool.tool.clone(),
            payload,
            timeout,
            context: scope.invocation.clone(),
        };

        let result = tokio::select! {
            biased;
            _ = scope.abort.cancelled() => Err(WorkflowError::aborted(step_id)),
            result = tokio::time::timeout(timeout, self.collaborators.tools.invoke(request)) => {
                map_invocation(step_id, timeout_secs, result)
            }
        };

        match &result {
            Ok(output) => progress.tool_end(&tool.tool, Some(output.clone()), None),
            Err(e) => progress.tool_end(&tool.tool, None, Some(e.to_string())),
        }

        result
    }

    /// Fan out to every branch, join them all, then aggregate
    ///
    /// Returns the aggregated output and a per-branch status summary.
    async fn run_parallel(
        &self,
        step_id: &str,
        parallel: &ParallelStep,
        context: &ExecutionContext,
        scope: &ExecutionScope,
    ) -> Result<(Value, Value), WorkflowError> {
        let branch_count = parallel.branches.len();
        let mut slots: Vec<Option<BranchOutcome>> = vec![None; branch_count];
        let mut abort_handles = Vec::with_capacity(branch_count);
        let mut pending = FuturesUnordered::new();

        for (index, branch) in parallel.branches.iter().enumerate() {
            // Inputs resolve against the context as it was before the step
            let resolved = runnable_agent(&branch.id, &branch.agent).and_then(|agent_id| {
                Ok((agent_id.to_string(), context.resolve_template(&branch.input)?))
            });

            let (agent_id, input) = match resolved {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(step_id, branch_id = %branch.id, error = %e, "Branch input not resolvable");
                    slots[index] = Some(BranchOutcome {
                        branch_id: branch.id.clone(),
                        result: Err(e),
                        duration_ms: 0,
                    });
                    continue;
                }
            };

            let agents = Arc::clone(&self.collaborators.agents);
            let scope = scope.clone();
            let progress = scope.progress.for_step(step_id);
            let branch_id = branch.id.clone();
            let timeout_secs = branch.timeout;

            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let result = call_agent(
                    agents.as_ref(),
                    &branch_id,
                    &agent_id,
                    input,
                    timeout_secs,
                    &scope,
                    &progress,
                )
                .await;
                (result, started.elapsed().as_millis() as u64)
            });

            abort_handles.push(handle.abort_handle());
            pending.push(handle.map(move |joined| (index, joined)));
        }

        debug!(step_id, branches = pending.len(), "Parallel branches started");

        let mut completion_order = Vec::with_capacity(branch_count);
        let mut interrupted = false;

        loop {
            tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                joined = pending.next() => match joined {
                    Some((index, joined)) => {
                        let branch_id = parallel.branches[index].id.clone();
                        let outcome = match joined {
                            Ok((result, duration_ms)) => BranchOutcome {
                                branch_id,
                                result,
                                duration_ms,
                            },
                            Err(e) => BranchOutcome {
                                result: Err(WorkflowError::invoker(
                                    &branch_id,
                                    format!("branch task failed: {}", e),
                                )),
                                branch_id,
                                duration_ms: 0,
                            },
                        };

                        completion_order.push(index);
                        slots[index] = Some(outcome);
                    }
                    None => break,
                },
            }
        }

        if interrupted {
            info!(
                step_id,
                in_flight = pending.len(),
                grace_ms = self.cancellation_grace.as_millis() as u64,
                "Cancellation requested, draining parallel branches"
            );

            let drain = async { while pending.next().await.is_some() {} };
            if tokio::time::timeout(self.cancellation_grace, drain).await.is_err() {
                warn!(step_id, "Parallel branches outlived the grace period, aborting");
                for handle in &abort_handles {
                    handle.abort();
                }
            }

            return Err(WorkflowError::aborted(step_id));
        }

        let outcomes: Vec<BranchOutcome> = slots.into_iter().flatten().collect();

        let branches: Map<String, Value> = outcomes
            .iter()
            .map(|o| {
                let summary = match &o.result {
                    Ok(_) => json!({ "status": StepStatus::Completed, "duration_ms": o.duration_ms }),
                    Err(e) => json!({
                        "status": StepStatus::Failed,
                        "duration_ms": o.duration_ms,
                        "error": e.to_string(),
                    }),
                };
                (o.branch_id.clone(), summary)
            })
            .collect();

        let output = aggregate(
            step_id,
            parallel.aggregation,
            &outcomes,
            &completion_order,
            self.collaborators.ranker.as_deref(),
            self.collaborators.merge.as_ref(),
            &scope.invocation,
        )
        .await?;

        Ok((output, Value::Object(branches)))
    }

    /// Evaluate the condition and map its label to a target step
    async fn evaluate_conditional(
        &self,
        step_id: &str,
        conditional: &ConditionalStep,
        timeout_secs: u64,
        context: &ExecutionContext,
    ) -> Result<(String, String), WorkflowError> {
        let label = self
            .evaluate(step_id, &conditional.condition_source, timeout_secs, context)
            .await?
            .as_label();

        let target = conditional.target_for(&label).ok_or_else(|| {
            WorkflowError::evaluator(format!(
                "step '{}': label '{}' matches no branch and there is no default",
                step_id, label
            ))
        })?;

        debug!(step_id, label = %label, next_step = target, "Condition evaluated");

        Ok((label, target.to_string()))
    }

    async fn evaluate(
        &self,
        step_id: &str,
        expression: &str,
        timeout_secs: u64,
        context: &ExecutionContext,
    ) -> Result<EvaluationOutcome, WorkflowError> {
        tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.collaborators.evaluator.evaluate(expression, context),
        )
        .await
        .map_err(|_| {
            WorkflowError::evaluator(format!(
                "step '{}': evaluation timed out after {}s",
                step_id, timeout_secs
            ))
        })?
        .map_err(|e| WorkflowError::evaluator(format!("step '{}': {}", step_id, e)))
    }

    /// Run a loop, restoring whatever the item variable was bound to before
    async fn run_loop(
        &self,
        step_id: &str,
        spec: &LoopStep,
        timeout_secs: u64,
        context: &mut ExecutionContext,
        scope: &ExecutionScope,
        iterations: &mut Vec<StepResult>,
    ) -> Result<Value, WorkflowError> {
        let previous = context.unbind(&spec.item_variable);

        let result = self
            .iterate(step_id, spec, timeout_secs, context, scope, iterations)
            .await;

        match previous {
            Some(value) => context.bind(spec.item_variable.as_str(), value),
            None => {
                context.unbind(&spec.item_variable);
            }
        }

        result
    }

    async fn iterate(
        &self,
        step_id: &str,
        spec: &LoopStep,
        timeout_secs: u64,
        context: &mut ExecutionContext,
        scope: &ExecutionScope,
        iterations: &mut Vec<StepResult>,
    ) -> Result<Value, WorkflowError> {
        let (items, limit) = match spec.mode {
            LoopMode::Foreach => {
                let items = self.loop_items(step_id, spec, timeout_secs, context).await?;
                let limit = items.len();
                (items, limit)
            }
            LoopMode::Count => (
                Vec::new(),
                self.loop_count(step_id, spec, timeout_secs, context).await?,
            ),
            LoopMode::Until => (Vec::new(), usize::MAX),
        };
        let limit = limit.min(spec.max_iterations as usize);

        debug!(step_id, mode = ?spec.mode, limit, "Starting loop");

        let mut collected = Vec::new();
        let mut last = Value::Null;

        for index in 0..limit {
            if scope.is_cancelled() {
                info!(step_id, iteration = index, "Loop interrupted by cancellation");
                return Err(WorkflowError::aborted(step_id));
            }

            let item = items.get(index).cloned().unwrap_or_else(|| json!(index));
            context.bind(spec.item_variable.as_str(), item);

            if let Some(condition) = &spec.break_condition {
                if self
                    .evaluate(step_id, condition, timeout_secs, context)
                    .await?
                    .is_truthy()
                {
                    debug!(step_id, iteration = index, "Break condition met");
                    break;
                }
            }

            let started = Instant::now();
            match self.run_iteration(spec, context, scope).await {
                Ok(output) => {
                    iterations.push(
                        StepResult::completed(step_id, output.clone())
                            .with_duration_ms(started.elapsed().as_millis() as u64)
                            .with_metadata("iteration", json!(index)),
                    );

                    if spec.collect_results {
                        collected.push(output.clone());
                    }
                    last = output;
                }
                Err(e) => {
                    iterations.push(
                        StepResult::failed(step_id, e.to_string())
                            .with_duration_ms(started.elapsed().as_millis() as u64)
                            .with_metadata("iteration", json!(index)),
                    );
                    return Err(e);
                }
            }

            if let Some(condition) = &spec.exit_condition {
                if self
                    .evaluate(step_id, condition, timeout_secs, context)
                    .await?
                    .is_truthy()
                {
                    debug!(step_id, iteration = index, "Exit condition met");
                    break;
                }
            }

            if let Some(condition) = &spec.continue_condition {
                if !self
                    .evaluate(step_id, condition, timeout_secs, context)
                    .await?
                    .is_truthy()
                {
                    debug!(step_id, iteration = index, "Continue condition no longer holds");
                    break;
                }
            }
        }

        Ok(if spec.collect_results {
            Value::Array(collected)
        } else {
            last
        })
    }

    async fn loop_items(
        &self,
        step_id: &str,
        spec: &LoopStep,
        timeout_secs: u64,
        context: &ExecutionContext,
    ) -> Result<Vec<Value>, WorkflowError> {
        let over = spec.over.as_deref().ok_or_else(|| {
            WorkflowError::definition(format!("Loop step '{}' has no 'over' expression", step_id))
        })?;

        match self
            .evaluate(step_id, over, timeout_secs, context)
            .await?
            .into_value()
        {
            Value::Array(items) => Ok(items),
            // Agents often hand back JSON as text
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Array(items)) => Ok(items),
                _ => Err(WorkflowError::evaluator(format!(
                    "step '{}': 'over' must evaluate to an array",
                    step_id
                ))),
            },
            other => Err(WorkflowError::evaluator(format!(
                "step '{}': 'over' must evaluate to an array, got {}",
                step_id, other
            ))),
        }
    }

    async fn loop_count(
        &self,
        step_id: &str,
        spec: &LoopStep,
        timeout_secs: u64,
        context: &ExecutionContext,
    ) -> Result<usize, WorkflowError> {
        let Some(expression) = spec.count.as_deref() else {
            return Ok(spec.max_iterations as usize);
        };

        let value = self
            .evaluate(step_id, expression, timeout_secs, context)
            .await?
            .into_value();

        let count = match &value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };

        count.map(|c| c as usize).ok_or_else(|| {
            WorkflowError::evaluator(format!(
                "step '{}': count must evaluate to a non-negative integer, got {}",
                step_id, value
            ))
        })
    }

    /// Run the inner steps of one iteration
    ///
    /// The iteration's output is the last successful agent or tool output.
    async fn run_iteration(
        &self,
        spec: &LoopStep,
        context: &mut ExecutionContext,
        scope: &ExecutionScope,
    ) -> Result<Value, WorkflowError> {
        let mut position = 0;
        let mut output = Value::Null;

        while let Some(inner) = spec.steps.get(position) {
            let started = Instant::now();
            let step_type = inner.kind.type_name();

            match self.run_inner(inner, context, scope).await {
                Ok(InnerOutput::Value(value)) => {
                    record_step(step_type, StepStatus::Completed, started.elapsed());
                    context.bind(inner.id.as_str(), value.clone());
                    output = value;
                    position += 1;
                }
                Ok(InnerOutput::Branch { label, target }) => {
                    record_step(step_type, StepStatus::Completed, started.elapsed());
                    context.bind(inner.id.as_str(), Value::String(label));
                    position = inner_position(spec, position, &target)?;
                }
                Err(error) => {
                    record_step(step_type, StepStatus::Failed, started.elapsed());

                    if matches!(error, WorkflowError::Aborted(_)) {
                        return Err(error);
                    }

                    match &inner.on_error {
                        OnError::Fail => return Err(error),
                        OnError::Skip => {
                            warn!(inner_step = %inner.id, error = %error, "Inner step failed, skipping");
                            position += 1;
                        }
                        OnError::Jump(target) => {
                            warn!(inner_step = %inner.id, error = %error, next_step = %target, "Inner step failed, jumping");
                            position = inner_position(spec, position, target)?;
                        }
                    }
                }
            }
        }

        Ok(output)
    }

    async fn run_inner(
        &self,
        inner: &InnerStep,
        context: &ExecutionContext,
        scope: &ExecutionScope,
    ) -> Result<InnerOutput, WorkflowError> {
        let step_id = inner.id.as_str();
        let step_type = inner.kind.type_name();

        match &inner.kind {
            InnerStepKind::Agent(agent) => {
                with_retries(step_id, step_type, inner.retries, &scope.cancel, move || {
                    self.run_agent(step_id, agent, inner.timeout, context, scope)
                })
                .await
                .0
                .map(InnerOutput::Value)
            }
            InnerStepKind::Tool(tool) => {
                with_retries(step_id, step_type, inner.retries, &scope.cancel, move || {
                    self.run_tool(step_id, tool, inner.timeout, context, scope)
                })
                .await
                .0
                .map(InnerOutput::Value)
            }
            InnerStepKind::Conditional(conditional) => self
                .evaluate_conditional(step_id, conditional, inner.timeout, context)
                .await
                .map(|(label, target)| InnerOutput::Branch { label, target }),
        }
    }

    /// Suspend until the approval channel resolves or the execution is cancelled
    async fn run_approval(
        &self,
        step_id: &str,
        approval: &ApprovalStep,
        context: &ExecutionContext,
        scope: &ExecutionScope,
        metadata: &mut Map<String, Value>,
    ) -> Result<Value, WorkflowError> {
        let message = context.resolve_template(&approval.message)?;
        let approval_id = ApprovalRequest::approval_id_for(&scope.invocation.execution_id, step_id);
        let timeout_secs = approval.approval_timeout_seconds;

        metadata.insert("approval_id".to_string(), Value::String(approval_id.clone()));

        scope.progress.emit(StreamEvent::ApprovalRequested {
            step_id: step_id.to_string(),
            approval_id: approval_id.clone(),
            message: message.clone(),
            approvers: approval.approvers.clone(),
            required_approvals: approval.required_approvals,
        });

        info!(
            step_id,
            approval_id = %approval_id,
            required = approval.required_approvals,
            "Waiting for approval"
        );

        let request = ApprovalRequest {
            approval_id,
            step_id: step_id.to_string(),
            message,
            approvers: approval.approvers.clone(),
            quorum: approval.required_approvals,
            timeout: Duration::from_secs(timeout_secs),
            context: scope.invocation.clone(),
        };

        let outcome = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => return Err(WorkflowError::aborted(step_id)),
            outcome = self.collaborators.approvals.await_decision(request) => outcome,
        };

        match outcome {
            Ok(ApprovalOutcome::Approved { approvers }) => {
                info!(step_id, ?approvers, "Approval granted");
                Ok(json!({ "approved": true, "approvers": approvers }))
            }
            Ok(ApprovalOutcome::Rejected { approver, reason }) => {
                metadata.insert("rejected_by".to_string(), Value::String(approver.clone()));
                if let Some(reason) = reason {
                    metadata.insert("reason".to_string(), Value::String(reason));
                }
                Err(WorkflowError::approval_rejected(step_id, approver))
            }
            Ok(ApprovalOutcome::TimedOut) | Err(InvokerError::Timeout) => {
                Err(WorkflowError::approval_timeout(step_id, timeout_secs))
            }
            Err(InvokerError::Aborted) => Err(WorkflowError::aborted(step_id)),
            Err(InvokerError::Failed(message)) => Err(WorkflowError::invoker(step_id, message)),
        }
    }
}

/// Run `attempt` up to `retries + 1` times (saturating)
///
/// Only retryable errors consume a retry. Returns the last outcome and the number of
/// attempts made.
async fn with_retries<T, F, Fut>(
    step_id: &str,
    step_type: &str,
    retries: u32,
    cancel: &CancellationToken,
    mut attempt: F,
) -> (Result<T, WorkflowError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WorkflowError>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error = match attempt().await {
            Ok(value) => return (Ok(value), attempts),
            Err(e) => e,
        };

        if !error.is_retryable() || attempts > retries {
            return (Err(error), attempts);
        }

        if cancel.is_cancelled() {
            return (Err(WorkflowError::aborted(step_id)), attempts);
        }

        warn!(
            step_id,
            attempt = attempts,
            max_attempts = retries.saturating_add(1),
            error = %error,
            "Step attempt failed, retrying"
        );
        record_step_retry(step_type, error.kind());
    }
}

/// Invoke an agent under a deadline, racing the abort token
async fn call_agent(
    agents: &dyn AgentInvoker,
    step_id: &str,
    agent_id: &str,
    input: String,
    timeout_secs: u64,
    scope: &ExecutionScope,
    progress: &ProgressSink,
) -> Result<Value, WorkflowError> {
    let timeout = Duration::from_secs(timeout_secs);
    let request = AgentRequest {
        agent_id: agent_id.to_string(),
        input,
        timeout,
        context: scope.invocation.clone(),
    };

    tokio::select! {
        biased;
        _ = scope.abort.cancelled() => Err(WorkflowError::aborted(step_id)),
        result = tokio::time::timeout(timeout, agents.invoke(request, progress)) => {
            map_invocation(step_id, timeout_secs, result)
        }
    }
}

fn map_invocation(
    step_id: &str,
    timeout_secs: u64,
    result: Result<Result<Value, InvokerError>, Elapsed>,
) -> Result<Value, WorkflowError> {
    match result {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(InvokerError::Failed(message))) => Err(WorkflowError::invoker(step_id, message)),
        Ok(Err(InvokerError::Aborted)) => Err(WorkflowError::aborted(step_id)),
        Ok(Err(InvokerError::Timeout)) | Err(_) => {
            Err(WorkflowError::invoker_timeout(step_id, timeout_secs))
        }
    }
}

fn runnable_agent<'a>(step_id: &str, agent: &'a AgentRef) -> Result<&'a str, WorkflowError> {
    agent.agent_id().ok_or_else(|| {
        WorkflowError::definition(format!(
            "Step '{}' references a suggested agent that has not been created",
            step_id
        ))
    })
}

/// Position of a forward jump target inside a loop body
fn inner_position(spec: &LoopStep, current: usize, target: &str) -> Result<usize, WorkflowError> {
    match spec.steps.iter().position(|s| s.id == target) {
        Some(position) if position > current => Ok(position),
        _ => Err(WorkflowError::definition(format!(
            "Loop inner step '{}' cannot jump to '{}'",
            spec.steps[current].id, target
        ))),
    }
}
