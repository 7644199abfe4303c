//! Infrastructure layer - Engine, collaborator and storage implementations

pub mod approval;
pub mod evaluator;
pub mod execution;
pub mod invoker;
pub mod logging;
pub mod observability;
pub mod services;
pub mod streaming;
pub mod workflow;
