//! Definition-time validation
//!
//! Everything caught here is a `WorkflowError::Definition` and is reported before any
//! step runs. Gaps in conditional coverage are not checked: the classifier is external,
//! so an unmatched label without a default surfaces at run time.

use std::collections::{HashMap, HashSet};

use super::entity::{OnError, WorkflowDefinition, WorkflowStep};
use super::error::WorkflowError;
use super::step_types::{
    AgentRef, ConditionalStep, InnerStep, InnerStepKind, LoopMode, LoopStep, StepKind,
};

impl WorkflowDefinition {
    /// Check the structure of the step graph
    pub fn validate(&self) -> Result<(), WorkflowError> {
        match self.entry_step() {
            None if !self.is_empty() => {
                return Err(WorkflowError::definition(
                    "entry_step is required when the workflow has steps",
                ));
            }
            Some(entry) if self.get_step(entry).is_none() => {
                return Err(WorkflowError::definition(format!(
                    "entry_step '{}' does not exist",
                    entry
                )));
            }
            _ => {}
        }

        for (key, step) in self.steps() {
            if key != step.id() {
                return Err(WorkflowError::definition(format!(
                    "step registered as '{}' declares id '{}'",
                    key,
                    step.id()
                )));
            }

            validate_step(step, self.steps())?;
        }

        Ok(())
    }

    /// Check that every agent reference points at an existing agent
    pub fn ensure_runnable(&self) -> Result<(), WorkflowError> {
        for step in self.steps().values() {
            let unresolved = match step.kind() {
                StepKind::Agent(agent) => is_suggestion(&agent.agent),
                StepKind::Parallel(parallel) => {
                    parallel.branches.iter().any(|b| is_suggestion(&b.agent))
                }
                StepKind::Loop(loop_step) => loop_step.steps.iter().any(|inner| {
                    matches!(&inner.kind, InnerStepKind::Agent(agent) if is_suggestion(&agent.agent))
                }),
                _ => false,
            };

            if unresolved {
                return Err(WorkflowError::definition(format!(
                    "step '{}' references a suggested agent that has not been created",
                    step.id()
                )));
            }
        }

        Ok(())
    }
}

fn is_suggestion(agent: &AgentRef) -> bool {
    agent.agent_id().is_none()
}

fn validate_step(
    step: &WorkflowStep,
    steps: &HashMap<String, WorkflowStep>,
) -> Result<(), WorkflowError> {
    let id = step.id();

    if id.is_empty() {
        return Err(WorkflowError::definition("step id cannot be empty"));
    }

    require_plain_id(id)?;

    if step.timeout() == 0 {
        return Err(WorkflowError::definition(format!(
            "step '{}' timeout must be positive",
            id
        )));
    }

    let exists = |target: &str| steps.contains_key(target);

    if let Some(next) = step.next() {
        require_reference(id, "next", next, exists)?;
    }

    if let Some(target) = step.on_error().target() {
        require_reference(id, "on_error", target, exists)?;
    }

    match step.kind() {
        StepKind::Agent(agent) => require_agent(id, &agent.agent),
        StepKind::Tool(tool) => {
            if tool.tool.is_empty() {
                return Err(WorkflowError::definition(format!(
                    "step '{}' requires a tool reference",
                    id
                )));
            }
            Ok(())
        }
        StepKind::Parallel(parallel) => {
            if parallel.branches.is_empty() {
                return Err(WorkflowError::definition(format!(
                    "parallel step '{}' requires at least one branch",
                    id
                )));
            }

            let mut seen = HashSet::new();
            for branch in &parallel.branches {
                if !seen.insert(branch.id.as_str()) {
                    return Err(WorkflowError::definition(format!(
                        "parallel step '{}' has duplicate branch id '{}'",
                        id, branch.id
                    )));
                }

                if branch.timeout == 0 {
                    return Err(WorkflowError::definition(format!(
                        "branch '{}' of step '{}' timeout must be positive",
                        branch.id, id
                    )));
                }

                require_agent(id, &branch.agent)?;
            }
            Ok(())
        }
        StepKind::Conditional(conditional) => validate_conditional(id, conditional, exists),
        StepKind::Loop(loop_step) => validate_loop(id, loop_step),
        StepKind::Approval(approval) => {
            if approval.required_approvals == 0 {
                return Err(WorkflowError::definition(format!(
                    "approval step '{}' requires a positive quorum",
                    id
                )));
            }

            let distinct: HashSet<&str> = approval.approvers.iter().map(String::as_str).collect();
            if approval.required_approvals as usize > distinct.len() {
                return Err(WorkflowError::definition(format!(
                    "approval step '{}' requires {} approvals but has {} approvers",
                    id,
                    approval.required_approvals,
                    distinct.len()
                )));
            }

            if approval.approval_timeout_seconds == 0 {
                return Err(WorkflowError::definition(format!(
                    "approval step '{}' timeout must be positive",
                    id
                )));
            }

            if let OnError::Jump(target) = &approval.on_reject {
                require_reference(id, "on_reject", target, exists)?;
            }
            Ok(())
        }
    }
}

fn validate_conditional(
    id: &str,
    conditional: &ConditionalStep,
    exists: impl Fn(&str) -> bool,
) -> Result<(), WorkflowError> {
    if conditional.condition_source.trim().is_empty() {
        return Err(WorkflowError::definition(format!(
            "conditional step '{}' requires a condition_source",
            id
        )));
    }

    for target in conditional.targets() {
        require_reference(id, "branch", target, &exists)?;
    }

    Ok(())
}

fn validate_loop(id: &str, loop_step: &LoopStep) -> Result<(), WorkflowError> {
    if loop_step.max_iterations == 0 {
        return Err(WorkflowError::definition(format!(
            "loop step '{}' max_iterations must be positive",
            id
        )));
    }

    match loop_step.mode {
        LoopMode::Foreach if loop_step.over.is_none() => {
            return Err(WorkflowError::definition(format!(
                "foreach loop '{}' requires 'over'",
                id
            )));
        }
        LoopMode::Count if loop_step.count.is_none() => {
            return Err(WorkflowError::definition(format!(
                "count loop '{}' requires 'count'",
                id
            )));
        }
        LoopMode::Until if !loop_step.has_condition() => {
            return Err(WorkflowError::definition(format!(
                "until loop '{}' requires a break, continue or exit condition",
                id
            )));
        }
        _ => {}
    }

    if loop_step.item_variable.trim().is_empty() {
        return Err(WorkflowError::definition(format!(
            "loop step '{}' requires an item_variable",
            id
        )));
    }

    if loop_step.steps.is_empty() {
        return Err(WorkflowError::definition(format!(
            "loop step '{}' requires at least one inner step",
            id
        )));
    }

    let positions: HashMap<&str, usize> = loop_step
        .steps
        .iter()
        .enumerate()
        .map(|(index, inner)| (inner.id.as_str(), index))
        .collect();

    if positions.len() != loop_step.steps.len() {
        return Err(WorkflowError::definition(format!(
            "loop step '{}' has duplicate inner step ids",
            id
        )));
    }

    for (index, inner) in loop_step.steps.iter().enumerate() {
        validate_inner_step(id, index, inner, &positions)?;
    }

    Ok(())
}

fn validate_inner_step(
    loop_id: &str,
    index: usize,
    inner: &InnerStep,
    positions: &HashMap<&str, usize>,
) -> Result<(), WorkflowError> {
    let qualified = format!("{}/{}", loop_id, inner.id);

    require_plain_id(&inner.id)?;

    if inner.timeout == 0 {
        return Err(WorkflowError::definition(format!(
            "step '{}' timeout must be positive",
            qualified
        )));
    }

    // Inner references only move forward so an iteration always terminates
    let forward = |target: &str| positions.get(target).is_some_and(|&at| at > index);

    if let Some(target) = inner.on_error.target() {
        if !forward(target) {
            return Err(WorkflowError::definition(format!(
                "step '{}' on_error must reference a later inner step, got '{}'",
                qualified, target
            )));
        }
    }

    match &inner.kind {
        InnerStepKind::Agent(agent) => require_agent(&qualified, &agent.agent),
        InnerStepKind::Tool(tool) => {
            if tool.tool.is_empty() {
                return Err(WorkflowError::definition(format!(
                    "step '{}' requires a tool reference",
                    qualified
                )));
            }
            Ok(())
        }
        InnerStepKind::Conditional(conditional) => {
            validate_conditional(&qualified, conditional, forward)
        }
    }
}

/// `fail` and `skip` are `on_error` keywords, so a jump to them could not be written
fn require_plain_id(step_id: &str) -> Result<(), WorkflowError> {
    if OnError::is_keyword(step_id) {
        return Err(WorkflowError::definition(format!(
            "step id '{}' is reserved",
            step_id
        )));
    }
    Ok(())
}

fn require_agent(step_id: &str, agent: &AgentRef) -> Result<(), WorkflowError> {
    match agent {
        AgentRef::Id(id) if id.is_empty() => Err(WorkflowError::definition(format!(
            "step '{}' has an empty agent id",
            step_id
        ))),
        _ => Ok(()),
    }
}

fn require_reference(
    step_id: &str,
    field: &str,
    target: &str,
    exists: impl Fn(&str) -> bool,
) -> Result<(), WorkflowError> {
    if exists(target) {
        Ok(())
    } else {
        Err(WorkflowError::definition(format!(
            "step '{}' {} references unknown step '{}'",
            step_id, field, target
        )))
    }
}
