//! Collaborators used by parallel-step aggregation

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::InvocationContext;
use super::error::InvokerError;

/// A successful branch output offered to a ranker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCandidate {
    pub branch_id: String,
    pub output: Value,
}

/// Picks the best branch for `best` aggregation
#[async_trait]
pub trait BranchRanker: Send + Sync + Debug {
    /// Return the id of the winning branch
    async fn rank(
        &self,
        candidates: &[BranchCandidate],
        context: &InvocationContext,
    ) -> Result<String, InvokerError>;
}

/// Combines successful branch outputs for `merge` aggregation
///
/// Outputs arrive in branch declaration order.
pub trait MergeStrategy: Send + Sync + Debug {
    fn merge(&self, outputs: &[(String, Value)]) -> Result<Value, String>;
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// Ranker that always picks the named branch
    #[derive(Debug)]
    pub struct FixedRanker(pub String);

    #[async_trait]
    impl BranchRanker for FixedRanker {
        async fn rank(
            &self,
            _candidates: &[BranchCandidate],
            _context: &InvocationContext,
        ) -> Result<String, InvokerError> {
            Ok(self.0.clone())
        }
    }
}
