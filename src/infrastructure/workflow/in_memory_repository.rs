//! In-memory workflow repository implementation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{DomainError, WorkflowDefinition, WorkflowId, WorkflowRepository};

/// In-memory implementation of WorkflowRepository
#[derive(Debug)]
pub struct InMemoryWorkflowRepository {
    definitions: Arc<RwLock<HashMap<String, WorkflowDefinition>>>,
}

impl InMemoryWorkflowRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self {
            definitions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a repository pre-populated with definitions
    pub fn with_definitions(definitions: Vec<WorkflowDefinition>) -> Self {
        let map: HashMap<String, WorkflowDefinition> = definitions
            .into_iter()
            .map(|d| (d.id().as_str().to_string(), d))
            .collect();

        Self {
            definitions: Arc::new(RwLock::new(map)),
        }
    }
}

impl Default for InMemoryWorkflowRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn get(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, DomainError> {
        let definitions = self.definitions.read().await;
        Ok(definitions.get(id.as_str()).cloned())
    }

    async fn list(&self) -> Result<Vec<WorkflowDefinition>, DomainError> {
        let definitions = self.definitions.read().await;
        let mut all: Vec<WorkflowDefinition> = definitions.values().cloned().collect();
        all.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
        Ok(all)
    }

    async fn create(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, DomainError> {
        let mut definitions = self.definitions.write().await;

        if definitions.contains_key(definition.id().as_str()) {
            return Err(DomainError::conflict(format!(
                "Workflow '{}' already exists",
                definition.id()
            )));
        }

        definitions.insert(definition.id().as_str().to_string(), definition.clone());
        Ok(definition)
    }

    async fn update(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, DomainError> {
        let mut definitions = self.definitions.write().await;

        if !definitions.contains_key(definition.id().as_str()) {
            return Err(DomainError::not_found(format!(
                "Workflow '{}' not found",
                definition.id()
            )));
        }

        definitions.insert(definition.id().as_str().to_string(), definition.clone());
        Ok(definition)
    }

    async fn delete(&self, id: &WorkflowId) -> Result<bool, DomainError> {
        let mut definitions = self.definitions.write().await;
        Ok(definitions.remove(id.as_str()).is_some())
    }

    async fn exists(&self, id: &WorkflowId) -> Result<bool, DomainError> {
        let definitions = self.definitions.read().await;
        Ok(definitions.contains_key(id.as_str()))
    }
}
