//! Workflow service - registration and lookup of workflow definitions

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::domain::{DomainError, WorkflowDefinition, WorkflowId, WorkflowRepository};

/// Outcome of validating a definition without registering it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Structurally sound: references resolve, quorums fit, no nesting
    pub valid: bool,

    /// Valid and free of placeholder agents
    pub runnable: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationReport {
    /// Run structural validation, then the runnable check
    pub fn from_definition(definition: &WorkflowDefinition) -> Self {
        if let Err(e) = definition.validate() {
            return Self {
                valid: false,
                runnable: false,
                error: Some(e.to_string()),
            };
        }

        match definition.ensure_runnable() {
            Ok(()) => Self {
                valid: true,
                runnable: true,
                error: None,
            },
            Err(e) => Self {
                valid: true,
                runnable: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Parse a definition file; the format follows the extension (`.json` or `.toml`)
pub fn parse_definition_file(path: &Path) -> Result<WorkflowDefinition, DomainError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DomainError::configuration(format!("Failed to read '{}': {}", path.display(), e))
    })?;

    parse_definition(&content, path)
}

fn parse_definition(content: &str, path: &Path) -> Result<WorkflowDefinition, DomainError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(content).map_err(|e| {
            DomainError::definition(format!("Invalid JSON in '{}': {}", path.display(), e))
        }),
        Some("toml") => toml::from_str(content).map_err(|e| {
            DomainError::definition(format!("Invalid TOML in '{}': {}", path.display(), e))
        }),
        _ => Err(DomainError::configuration(format!(
            "Unsupported definition format: '{}'",
            path.display()
        ))),
    }
}

fn is_definition_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("toml")
    )
}

/// Workflow service for definition management
pub struct WorkflowService {
    repository: Arc<dyn WorkflowRepository>,
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService").finish()
    }
}

impl WorkflowService {
    pub fn new(repository: Arc<dyn WorkflowRepository>) -> Self {
        Self { repository }
    }

    /// Get a workflow by ID
    pub async fn get(&self, id: &str) -> Result<Option<WorkflowDefinition>, DomainError> {
        let workflow_id = self.parse_id(id)?;
        self.repository.get(&workflow_id).await
    }

    /// List all workflows
    pub async fn list(&self) -> Result<Vec<WorkflowDefinition>, DomainError> {
        self.repository.list().await
    }

    /// Validate, then store a new definition
    #[instrument(skip(self, definition), fields(workflow_id = %definition.id()))]
    pub async fn register(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, DomainError> {
        definition.validate()?;

        let created = self.repository.create(definition).await?;
        info!(steps = created.step_count(), "Workflow registered");
        Ok(created)
    }

    /// Validate, then replace an existing definition
    #[instrument(skip(self, definition), fields(workflow_id = %definition.id()))]
    pub async fn replace(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, DomainError> {
        definition.validate()?;

        let updated = self.repository.update(definition).await?;
        info!(steps = updated.step_count(), "Workflow replaced");
        Ok(updated)
    }

    /// Delete a workflow
    pub async fn delete(&self, id: &str) -> Result<bool, DomainError> {
        let workflow_id = self.parse_id(id)?;
        self.repository.delete(&workflow_id).await
    }

    /// Check a definition without storing it
    pub fn validate(&self, definition: &WorkflowDefinition) -> ValidationReport {
        ValidationReport::from_definition(definition)
    }

    /// Register every `.json` / `.toml` definition found in a directory
    ///
    /// Files are loaded in name order. A definition whose id is already registered
    /// replaces the stored one. Returns the number of definitions loaded.
    #[instrument(skip(self, dir), fields(dir = %dir.as_ref().display()))]
    pub async fn load_directory(&self, dir: impl AsRef<Path>) -> Result<usize, DomainError> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            DomainError::configuration(format!(
                "Failed to read workflow directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DomainError::configuration(e.to_string()))?
        {
            let path = entry.path();
            if is_definition_file(&path) {
                paths.push(path);
            } else {
                debug!(path = %path.display(), "Skipping non-definition file");
            }
        }
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                DomainError::configuration(format!("Failed to read '{}': {}", path.display(), e))
            })?;
            let definition = parse_definition(&content, &path)?;

            if self.repository.exists(definition.id()).await? {
                warn!(
                    workflow_id = %definition.id(),
                    path = %path.display(),
                    "Replacing already registered workflow"
                );
                self.replace(definition).await?;
            } else {
                self.register(definition).await?;
            }
            loaded += 1;
        }

        info!(loaded, "Workflow definitions loaded");
        Ok(loaded)
    }

    fn parse_id(&self, id: &str) -> Result<WorkflowId, DomainError> {
        Ok(WorkflowId::new(id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::{AgentStep, SuggestedAgent};
    use crate::domain::{StepKind, WorkflowStep};
    use crate::infrastructure::workflow::InMemoryWorkflowRepository;
    use std::fs;

    fn service() -> WorkflowService {
        WorkflowService::new(Arc::new(InMemoryWorkflowRepository::new()))
    }

    fn definition(id: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(WorkflowId::new(id).unwrap()).with_step(WorkflowStep::new(
            "answer",
            StepKind::Agent(AgentStep::new("assistant", "{{user_input}}")),
        ))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let service = service();
        service.register(definition("support")).await.unwrap();

        let fetched = service.get("support").await.unwrap().unwrap();
        assert_eq!(fetched.entry_step(), Some("answer"));
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let service = service();
        service.register(definition("support")).await.unwrap();

        let result = service.register(definition("support")).await;
        assert!(matches!(result, Err(DomainError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_definition() {
        let service = service();
        let dangling = WorkflowDefinition::new(WorkflowId::new("broken").unwrap()).with_step(
            WorkflowStep::new(
                "answer",
                StepKind::Agent(AgentStep::new("assistant", "hi")),
            )
            .with_next("ghost"),
        );

        let result = service.register(dangling).await;
        assert!(matches!(result, Err(DomainError::Definition { .. })));
        assert!(service.get("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_and_delete() {
        let service = service();
        service.register(definition("support")).await.unwrap();

        service
            .replace(definition("support").with_description("v2"))
            .await
            .unwrap();
        let fetched = service.get("support").await.unwrap().unwrap();
        assert_eq!(fetched.description(), Some("v2"));

        assert!(service.delete("support").await.unwrap());
        assert!(!service.delete("support").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_workflow_id() {
        let service = service();
        let result = service.get("not a valid id!").await;

        assert!(matches!(result, Err(DomainError::InvalidId { .. })));
    }

    #[test]
    fn test_validate_report() {
        let service = service();

        let report = service.validate(&definition("support"));
        assert!(report.valid && report.runnable);

        let placeholder = WorkflowDefinition::new(WorkflowId::new("draft").unwrap()).with_step(
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
        let report = service.validate(&placeholder);
        assert!(report.valid);
        assert!(!report.runnable);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();

        fs::write(
            dir.path().join("a-support.json"),
            serde_json::to_string(&definition("support")).unwrap(),
        )
        .unwrap();
        fs::write(
            dir.path().join("b-review.toml"),
            r#"
id = "review"
entry_step = "check"

[steps.check]
id = "check"
type = "agent"
agent = "reviewer"
input = "{{user_input}}"
retries = 1
"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let service = service();
        let loaded = service.load_directory(dir.path()).await.unwrap();
        assert_eq!(loaded, 2);

        let review = service.get("review").await.unwrap().unwrap();
        assert_eq!(review.get_step("check").unwrap().retries(), 1);
        assert!(service.get("support").await.unwrap().is_some());

        // Loading again replaces instead of conflicting
        assert_eq!(service.load_directory(dir.path()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_load_directory_with_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let result = service().load_directory(dir.path()).await;
        assert!(matches!(result, Err(DomainError::Definition { .. })));
    }

    #[tokio::test]
    async fn test_load_missing_directory() {
        let result = service().load_directory("/nonexistent/workflows").await;
        assert!(matches!(result, Err(DomainError::Configuration { .. })));
    }

    #[test]
    fn test_parse_definition_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("support.json");
        fs::write(&path, serde_json::to_string(&definition("support")).unwrap()).unwrap();

        let parsed = parse_definition_file(&path).unwrap();
        assert_eq!(parsed.id().as_str(), "support");

        let unsupported = dir.path().join("support.yaml");
        fs::write(&unsupported, "id: support").unwrap();
        assert!(matches!(
            parse_definition_file(&unsupported),
            Err(DomainError::Configuration { .. })
        ));
    }
}
