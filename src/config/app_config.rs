use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use serde::Deserialize;

use crate::infrastructure::observability::MetricsConfig;
use crate::infrastructure::workflow::EngineConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub invokers: InvokersConfig,

    #[serde(default)]
    pub workflows: WorkflowsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Where the HTTP collaborators live
#[derive(Debug, Clone, Deserialize)]
pub struct InvokersConfig {
    #[serde(default = "default_agent_base_url")]
    pub agent_base_url: String,

    #[serde(default = "default_tool_base_url")]
    pub tool_base_url: String,

    /// Judge agent for `best` aggregation; without one `best` steps fail
    #[serde(default)]
    pub ranker_agent: Option<String>,

    #[serde(default = "default_ranker_timeout_secs")]
    pub ranker_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowsConfig {
    /// Directory of `.json` / `.toml` definitions registered at startup
    #[serde(default)]
    pub directory: Option<String>,

    /// Executions kept in memory before the oldest finished ones are evicted
    #[serde(default = "default_max_executions")]
    pub max_executions: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_level() -> String {
    "info".to_string()
}

fn default_agent_base_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_tool_base_url() -> String {
    "http://localhost:8082".to_string()
}

fn default_ranker_timeout_secs() -> u64 {
    60
}

fn default_max_executions() -> usize {
    crate::infrastructure::execution::DEFAULT_MAX_EXECUTIONS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for InvokersConfig {
    fn default() -> Self {
        Self {
            agent_base_url: default_agent_base_url(),
            tool_base_url: default_tool_base_url(),
            ranker_agent: None,
            ranker_timeout_secs: default_ranker_timeout_secs(),
        }
    }
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_executions: default_max_executions(),
        }
    }
}

impl AppConfig {
    /// Layer `config/default`, `config/local` and `APP__*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            config::Config::builder()
                .add_source(config::File::with_name("config/default").required(false))
                .add_source(config::File::with_name("config/local").required(false))
                .add_source(environment()),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("APP")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_sources() {
        let config = AppConfig::from_builder(config::Config::builder()).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.engine.max_steps, 100);
        assert_eq!(config.engine.cancellation_grace_ms, 5_000);
        assert!(config.metrics.enabled);
        assert!(config.workflows.directory.is_none());
    }

    #[test]
    fn test_file_then_environment_layering() {
        let file = r#"
[server]
port = 9000

[logging]
level = "debug"
format = "json"

[engine]
max_steps = 25

[invokers]
agent_base_url = "http://agents.internal"
ranker_agent = "judge"

[workflows]
directory = "workflows"
"#;

        let env: HashMap<String, String> = [
            ("APP__SERVER__PORT".to_string(), "9100".to_string()),
            ("APP__ENGINE__CANCELLATION_GRACE_MS".to_string(), "250".to_string()),
        ]
        .into_iter()
        .collect();

        let config = AppConfig::from_builder(
            config::Config::builder()
                .add_source(File::from_str(file, FileFormat::Toml))
                .add_source(environment().source(Some(env))),
        )
        .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.engine.max_steps, 25);
        assert_eq!(config.engine.cancellation_grace_ms, 250);
        assert_eq!(config.invokers.agent_base_url, "http://agents.internal");
        assert_eq!(config.invokers.tool_base_url, "http://localhost:8082");
        assert_eq!(config.invokers.ranker_agent.as_deref(), Some("judge"));
        assert_eq!(config.workflows.directory.as_deref(), Some("workflows"));
    }
}
