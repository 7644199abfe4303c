//! Execution result storage

mod in_memory_repository;

pub use in_memory_repository::{InMemoryExecutionRepository, DEFAULT_MAX_EXECUTIONS};
