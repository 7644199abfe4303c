//! Workflow execution: step executor, engine, aggregation and storage

mod aggregation;
mod engine;
mod in_memory_repository;
mod step_executor;

pub use aggregation::{aggregate, BranchOutcome, DefaultMergeStrategy, TEXT_SEPARATOR};
pub use engine::{
    EngineConfig, ExecutionEngine, ExecutionObserver, ExecutionRequest, DEFAULT_MAX_STEPS,
};
pub use in_memory_repository::InMemoryWorkflowRepository;
pub use step_executor::{
    Collaborators, ExecutionScope, StepExecutor, StepOutcome, Transition,
    DEFAULT_CANCELLATION_GRACE,
};
