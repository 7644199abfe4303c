//! In-memory approval channel

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::domain::{
    ApprovalChannel, ApprovalDecision, ApprovalOutcome, ApprovalRequest, DomainError,
    InvokerError,
};

#[derive(Debug)]
struct PendingApproval {
    approvers: HashSet<String>,
    quorum: usize,
    /// Distinct approvals in arrival order
    approved: Vec<String>,
    responder: Option<oneshot::Sender<ApprovalOutcome>>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingApproval>>>;

/// Approval channel keeping pending gates in memory
///
/// Waiting parks on a oneshot receiver, so no thread is held while a gate is open.
#[derive(Debug, Clone, Default)]
pub struct InMemoryApprovalChannel {
    pending: PendingMap,
}

/// Removes the pending entry when the waiter goes away, however it ends
struct Registration {
    pending: PendingMap,
    approval_id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.approval_id);
    }
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, PendingApproval>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryApprovalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a gate with this id is waiting for responses
    pub fn is_pending(&self, approval_id: &str) -> bool {
        lock(&self.pending).contains_key(approval_id)
    }

    /// Ids of all open gates
    pub fn pending_ids(&self) -> Vec<String> {
        lock(&self.pending).keys().cloned().collect()
    }
}

#[async_trait]
impl ApprovalChannel for InMemoryApprovalChannel {
    async fn await_decision(
        &self,
        request: ApprovalRequest,
    ) -> Result<ApprovalOutcome, InvokerError> {
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock(&self.pending);
            if pending.contains_key(&request.approval_id) {
                return Err(InvokerError::failed(format!(
                    "Approval '{}' is already pending",
                    request.approval_id
                )));
            }

            pending.insert(
                request.approval_id.clone(),
                PendingApproval {
                    approvers: request.approvers.iter().cloned().collect(),
                    quorum: request.quorum as usize,
                    approved: Vec::new(),
                    responder: Some(tx),
                },
            );
        }

        let _registration = Registration {
            pending: Arc::clone(&self.pending),
            approval_id: request.approval_id.clone(),
        };

        info!(
            approval_id = %request.approval_id,
            quorum = request.quorum,
            timeout_secs = request.timeout.as_secs(),
            "Approval pending"
        );

        match tokio::time::timeout(request.timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(InvokerError::failed("Approval channel closed")),
            Err(_) => {
                info!(approval_id = %request.approval_id, "Approval timed out");
                Ok(ApprovalOutcome::TimedOut)
            }
        }
    }

    async fn submit(
        &self,
        approval_id: &str,
        approver: &str,
        decision: ApprovalDecision,
        reason: Option<String>,
    ) -> Result<(), DomainError> {
        let mut pending = lock(&self.pending);

        let entry = pending.get_mut(approval_id).ok_or_else(|| {
            DomainError::not_found(format!("No pending approval '{}'", approval_id))
        })?;

        if !entry.approvers.contains(approver) {
            return Err(DomainError::validation(format!(
                "'{}' is not an approver for '{}'",
                approver, approval_id
            )));
        }

        let outcome = match decision {
            ApprovalDecision::Reject => Some(ApprovalOutcome::Rejected {
                approver: approver.to_string(),
                reason,
            }),
            ApprovalDecision::Approve => {
                if !entry.approved.iter().any(|a| a == approver) {
                    entry.approved.push(approver.to_string());
                }

                debug!(
                    approval_id,
                    approver,
                    approvals = entry.approved.len(),
                    quorum = entry.quorum,
                    "Approval recorded"
                );

                (entry.approved.len() >= entry.quorum).then(|| ApprovalOutcome::Approved {
                    approvers: entry.approved.clone(),
                })
            }
        };

        if let Some(outcome) = outcome {
            if let Some(responder) = entry.responder.take() {
                let _ = responder.send(outcome);
            }
            pending.remove(approval_id);
        }

        Ok(())
    }
}
