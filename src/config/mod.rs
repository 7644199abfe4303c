//! Application configuration

mod app_config;

pub use app_config::{
    AppConfig, InvokersConfig, LogFormat, LoggingConfig, ServerConfig, WorkflowsConfig,
};
