//! Validate command - checks a definition file offline

use anyhow::bail;

use super::ValidateArgs;
use crate::infrastructure::services::{parse_definition_file, ValidationReport};

/// Parse and check a definition, printing the report as JSON
pub async fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let report = check(&args)?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    let passed = if args.structural {
        report.valid
    } else {
        report.runnable
    };
    if !passed {
        bail!(
            "{}",
            report
                .error
                .unwrap_or_else(|| "workflow is not runnable".to_string())
        );
    }

    Ok(())
}

fn check(args: &ValidateArgs) -> anyhow::Result<ValidationReport> {
    let definition = parse_definition_file(&args.file)?;
    Ok(ValidationReport::from_definition(&definition))
}
