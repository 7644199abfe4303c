//! Workflow repository trait

use async_trait::async_trait;

use super::entity::{WorkflowDefinition, WorkflowId};
use crate::domain::DomainError;

/// Repository trait for workflow definitions
#[async_trait]
pub trait WorkflowRepository: Send + Sync + std::fmt::Debug {
    /// Get a definition by ID
    async fn get(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, DomainError>;

    /// List all definitions
    async fn list(&self) -> Result<Vec<WorkflowDefinition>, DomainError>;

    /// Store a new definition
    async fn create(&self, definition: WorkflowDefinition)
    -> Result<WorkflowDefinition, DomainError>;

    /// Replace an existing definition
    async fn update(&self, definition: WorkflowDefinition)
    -> Result<WorkflowDefinition, DomainError>;

    /// Delete a definition by ID
    async fn delete(&self, id: &WorkflowId) -> Result<bool, DomainError>;

    /// Check if a definition exists
    async fn exists(&self, id: &WorkflowId) -> Result<bool, DomainError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock workflow repository for testing
    #[derive(Debug, Default)]
    pub struct MockWorkflowRepository {
        definitions: Mutex<HashMap<String, WorkflowDefinition>>,
        should_fail: Mutex<Option<String>>,
    }

    impl MockWorkflowRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_definition(self, definition: WorkflowDefinition) -> Self {
            self.definitions
                .lock()
                .unwrap()
                .insert(definition.id().as_str().to_string(), definition);
            self
        }

        pub fn with_error(self, error: impl Into<String>) -> Self {
            *self.should_fail.lock().unwrap() = Some(error.into());
            self
        }

        fn check_error(&self) -> Result<(), DomainError> {
            if let Some(ref msg) = *self.should_fail.lock().unwrap() {
                return Err(DomainError::internal(msg.clone()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl WorkflowRepository for MockWorkflowRepository {
        async fn get(&self, id: &WorkflowId) -> Result<Option<WorkflowDefinition>, DomainError> {
            self.check_error()?;
            let definitions = self.definitions.lock().unwrap();
            Ok(definitions.get(id.as_str()).cloned())
        }

        async fn list(&self) -> Result<Vec<WorkflowDefinition>, DomainError> {
            self.check_error()?;
            let definitions = self.definitions.lock().unwrap();
            Ok(definitions.values().cloned().collect())
        }

        async fn create(
            &self,
            definition: WorkflowDefinition,
        ) -> Result<WorkflowDefinition, DomainError> {
            self.check_error()?;
            let mut definitions = self.definitions.lock().unwrap();

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
            self.check_error()?;
            let mut definitions = self.definitions.lock().unwrap();

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
            self.check_error()?;
            let mut definitions = self.definitions.lock().unwrap();
            Ok(definitions.remove(id.as_str()).is_some())
        }

        async fn exists(&self, id: &WorkflowId) -> Result<bool, DomainError> {
            self.check_error()?;
            let definitions = self.definitions.lock().unwrap();
            Ok(definitions.contains_key(id.as_str()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::workflow::{AgentStep, StepKind, WorkflowStep};

        fn create_test_definition(id: &str) -> WorkflowDefinition {
            WorkflowDefinition::new(WorkflowId::new(id).unwrap())
                .with_name(format!("Test {}", id))
                .with_step(WorkflowStep::new(
                    "step1",
                    StepKind::Agent(AgentStep::new("assistant", "{{user_input}}")),
                ))
        }

        #[tokio::test]
        async fn test_mock_create_and_get() {
            let repo = MockWorkflowRepository::new();
            let definition = create_test_definition("test-1");

            let created = repo.create(definition).await.unwrap();
            assert_eq!(created.id().as_str(), "test-1");

            let retrieved = repo.get(created.id()).await.unwrap();
            assert_eq!(retrieved.unwrap().name(), Some("Test test-1"));
        }

        #[tokio::test]
        async fn test_mock_create_duplicate() {
            let definition = create_test_definition("test-1");
            let repo = MockWorkflowRepository::new().with_definition(definition.clone());

            let result = repo.create(definition).await;
            assert!(result.unwrap_err().to_string().contains("already exists"));
        }

        #[tokio::test]
        async fn test_mock_delete() {
            let definition = create_test_definition("test-1");
            let id = definition.id().clone();
            let repo = MockWorkflowRepository::new().with_definition(definition);

            assert!(repo.delete(&id).await.unwrap());
            assert!(!repo.exists(&id).await.unwrap());
            assert!(!repo.delete(&id).await.unwrap());
        }

        #[tokio::test]
        async fn test_mock_with_error() {
            let repo = MockWorkflowRepository::new().with_error("Simulated error");

            let result = repo.list().await;
            assert!(result.unwrap_err().to_string().contains("Simulated error"));
        }
    }
}
