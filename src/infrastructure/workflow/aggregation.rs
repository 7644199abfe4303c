//! Parallel-step aggregation

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::domain::workflow::{Aggregation, WorkflowError};
use crate::domain::{BranchCandidate, BranchRanker, InvocationContext, MergeStrategy};

/// Separator between concatenated textual branch outputs
pub const TEXT_SEPARATOR: &str = "\n\n";

/// Terminal state of one parallel branch
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub branch_id: String,
    pub result: Result<Value, WorkflowError>,
    pub duration_ms: u64,
}

/// Merge policy for `merge` aggregation
///
/// - all strings: concatenated in branch order, separated by a blank line
/// - all arrays: concatenated in branch order
/// - all objects: shallow key union; a key produced by two branches is an error
/// - anything else: error
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMergeStrategy;

impl MergeStrategy for DefaultMergeStrategy {
    fn merge(&self, outputs: &[(String, Value)]) -> Result<Value, String> {
        let values: Vec<&Value> = outputs.iter().map(|(_, value)| value).collect();

        if values.iter().all(|v| v.is_string()) {
            let text: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
            return Ok(Value::String(text.join(TEXT_SEPARATOR)));
        }

        if values.iter().all(|v| v.is_array()) {
            let items = values
                .iter()
                .filter_map(|v| v.as_array())
                .flat_map(|items| items.iter().cloned())
                .collect();
            return Ok(Value::Array(items));
        }

        if values.iter().all(|v| v.is_object()) {
            let mut merged = Map::new();
            let mut owners: HashMap<&str, &str> = HashMap::new();

            for (branch_id, value) in outputs {
                let Some(obj) = value.as_object() else {
                    continue;
                };

                for (key, item) in obj {
                    if let Some(owner) = owners.get(key.as_str()) {
                        return Err(format!(
                            "key '{}' produced by both '{}' and '{}'",
                            key, owner, branch_id
                        ));
                    }
                    owners.insert(key.as_str(), branch_id.as_str());
                    merged.insert(key.clone(), item.clone());
                }
            }

            return Ok(Value::Object(merged));
        }

        Err("cannot merge outputs of different types".to_string())
    }
}

/// Combine branch outcomes per the aggregation policy
///
/// `outcomes` are in declaration order; `completion_order` lists their indices in the
/// order the branches finished.
pub async fn aggregate(
    step_id: &str,
    policy: Aggregation,
    outcomes: &[BranchOutcome],
    completion_order: &[usize],
    ranker: Option<&dyn BranchRanker>,
    merge: &dyn MergeStrategy,
    context: &InvocationContext,
) -> Result<Value, WorkflowError> {
    let successes: Vec<(String, Value)> = outcomes
        .iter()
        .filter_map(|o| {
            o.result
                .as_ref()
                .ok()
                .map(|value| (o.branch_id.clone(), value.clone()))
        })
        .collect();

    if successes.is_empty() {
        let reasons: Vec<String> = outcomes
            .iter()
            .filter_map(|o| {
                o.result
                    .as_ref()
                    .err()
                    .map(|e| format!("{}: {}", o.branch_id, e))
            })
            .collect();

        return Err(WorkflowError::aggregation(
            step_id,
            format!("all {} branches failed ({})", outcomes.len(), reasons.join("; ")),
        ));
    }

    match policy {
        Aggregation::All => Ok(Value::Object(successes.into_iter().collect())),

        Aggregation::First => completion_order
            .iter()
            .filter_map(|&index| outcomes.get(index))
            .find_map(|o| o.result.as_ref().ok().cloned())
            .ok_or_else(|| WorkflowError::aggregation(step_id, "no branch completed")),

        Aggregation::Merge => merge
            .merge(&successes)
            .map_err(|e| WorkflowError::aggregation(step_id, e)),

        Aggregation::Best => {
            let ranker = ranker.ok_or_else(|| {
                WorkflowError::aggregation(step_id, "no branch ranker configured")
            })?;

            let candidates: Vec<BranchCandidate> = successes
                .iter()
                .map(|(branch_id, output)| BranchCandidate {
                    branch_id: branch_id.clone(),
                    output: output.clone(),
                })
                .collect();

            let winner = ranker
                .rank(&candidates, context)
                .await
                .map_err(|e| WorkflowError::aggregation(step_id, format!("ranking failed: {}", e)))?;

            successes
                .into_iter()
                .find(|(branch_id, _)| *branch_id == winner)
                .map(|(_, output)| output)
                .ok_or_else(|| {
                    WorkflowError::aggregation(
                        step_id,
                        format!("ranker picked unknown or failed branch '{}'", winner),
                    )
                })
        }
    }
}
