//! CLI module for the workflow engine
//!
//! - `serve`: run the HTTP API (default)
//! - `validate`: check a workflow definition file without starting the server

pub mod serve;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// PMP Workflow Engine - Step-graph execution for agents, tools and approvals
#[derive(Parser)]
#[command(name = "pmp-workflow-engine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the API server
    Serve,

    /// Validate a workflow definition file (.json or .toml)
    Validate(ValidateArgs),
}

#[derive(clap::Args, Debug)]
pub struct ValidateArgs {
    /// Path to the definition file
    pub file: PathBuf,

    /// Only check structure; suggested agents are accepted
    #[arg(long)]
    pub structural: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::try_parse_from(["pmp-workflow-engine"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_validate() {
        let cli =
            Cli::try_parse_from(["pmp-workflow-engine", "validate", "flow.toml", "--structural"])
                .unwrap();

        match cli.command {
            Some(Command::Validate(args)) => {
                assert_eq!(args.file, PathBuf::from("flow.toml"));
                assert!(args.structural);
            }
            _ => panic!("Expected validate command"),
        }
    }

    #[test]
    fn test_validate_requires_file() {
        assert!(Cli::try_parse_from(["pmp-workflow-engine", "validate"]).is_err());
    }
}
