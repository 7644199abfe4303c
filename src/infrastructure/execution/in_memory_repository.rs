//! In-memory execution repository

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{DomainError, ExecutionId, ExecutionRepository, ExecutionResult, WorkflowId};

/// Default number of executions kept before the oldest finished ones are evicted
pub const DEFAULT_MAX_EXECUTIONS: usize = 10_000;

/// In-memory implementation of ExecutionRepository
#[derive(Debug)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<HashMap<String, ExecutionResult>>>,
    max_executions: usize,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::with_max_executions(DEFAULT_MAX_EXECUTIONS)
    }

    pub fn with_max_executions(max_executions: usize) -> Self {
        Self {
            executions: Arc::new(RwLock::new(HashMap::new())),
            max_executions,
        }
    }

    /// Evict the oldest finished executions once over the limit
    ///
    /// Running executions are never evicted.
    fn evict_if_needed(executions: &mut HashMap<String, ExecutionResult>, max_executions: usize) {
        if executions.len() <= max_executions {
            return;
        }

        let mut finished: Vec<_> = executions
            .values()
            .filter(|e| e.is_terminal())
            .map(|e| (e.execution_id().as_str().to_string(), e.started_at()))
            .collect();
        finished.sort_by(|a, b| a.1.cmp(&b.1));

        let to_remove = executions.len() - max_executions;

        for (id, _) in finished.into_iter().take(to_remove) {
            executions.remove(&id);
        }
    }
}

impl Default for InMemoryExecutionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn get(&self, id: &ExecutionId) -> Result<Option<ExecutionResult>, DomainError> {
        let executions = self.executions.read().await;
        Ok(executions.get(id.as_str()).cloned())
    }

    async fn create(&self, execution: ExecutionResult) -> Result<ExecutionResult, DomainError> {
        let mut executions = self.executions.write().await;
        let key = execution.execution_id().as_str().to_string();

        if executions.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "Execution '{}' already exists",
                key
            )));
        }

        executions.insert(key, execution.clone());
        Self::evict_if_needed(&mut executions, self.max_executions);

        Ok(execution)
    }

    async fn update(&self, execution: ExecutionResult) -> Result<ExecutionResult, DomainError> {
        let mut executions = self.executions.write().await;
        let key = execution.execution_id().as_str();

        let Some(stored) = executions.get_mut(key) else {
            return Err(DomainError::not_found(format!(
                "Execution '{}' not found",
                key
            )));
        };

        // A terminal snapshot is final
        if stored.is_terminal() {
            return Err(DomainError::conflict(format!(
                "Execution '{}' already finished as {}",
                key,
                stored.status()
            )));
        }

        *stored = execution.clone();
        Ok(execution)
    }

    async fn list(&self) -> Result<Vec<ExecutionResult>, DomainError> {
        let executions = self.executions.read().await;
        let mut all: Vec<ExecutionResult> = executions.values().cloned().collect();
        all.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
        Ok(all)
    }

    async fn list_by_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ExecutionResult>, DomainError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|e| e.workflow_id() == workflow_id)
            .collect())
    }
}
