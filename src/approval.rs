//! Approval gating for operations that require a human (or policy) decision

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{OrchestratorError, Result};

/// Decision returned by an approval handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    /// Approve this invocation only
    Approved,
    /// Approve and auto-approve the operation from now on
    ApprovedAlways,
    /// Deny this invocation only
    Denied,
    /// Deny and auto-deny the operation from now on
    DeniedAlways,
}

/// What the handler is asked to decide about
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub call_id: String,
    pub operation: String,
    pub parameters: Value,
    /// Description from the operation definition, for display
    pub description: String,
}

/// Trait answering approval requests: a console prompt, a UI bridge, or a
/// policy engine
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<ApprovalDecision>;
}

#[derive(Debug, Default)]
struct ApprovalMemory {
    auto_approve: HashSet<String>,
    auto_deny: HashSet<String>,
}

/// Gate consulted before every approval-requiring call.
///
/// Remembered decisions are checked first and bypass the handler. The
/// auto-approve and auto-deny sets are disjoint: remembering one side
/// removes the operation from the other. With no handler configured the
/// gate fails closed.
pub struct ApprovalGate {
    handler: Option<Arc<dyn ApprovalHandler>>,
    memory: Mutex<ApprovalMemory>,
}

impl ApprovalGate {
    pub fn new(handler: Option<Arc<dyn ApprovalHandler>>) -> Self {
        Self {
            handler,
            memory: Mutex::new(ApprovalMemory::default()),
        }
    }

    /// Returns `Ok(())` when the call may proceed, or an approval error
    /// when it was denied (remembered or fresh) or no handler exists.
    pub async fn check(&self, request: &ApprovalRequest) -> Result<()> {
        {
            let memory = self.memory.lock().await;
            if memory.auto_approve.contains(&request.operation) {
                tracing::debug!(operation = %request.operation, "auto-approved from memory");
                return Ok(());
            }
            if memory.auto_deny.contains(&request.operation) {
                tracing::debug!(operation = %request.operation, "auto-denied from memory");
                return Err(OrchestratorError::approval_denied(&request.operation));
            }
        }

        let handler = match &self.handler {
            Some(handler) => handler,
            None => {
                return Err(OrchestratorError::NoApprovalHandler {
                    operation: request.operation.clone(),
                });
            }
        };

        match handler.request_approval(request).await? {
            ApprovalDecision::Approved => Ok(()),
            ApprovalDecision::ApprovedAlways => {
                let mut memory = self.memory.lock().await;
                memory.auto_deny.remove(&request.operation);
                memory.auto_approve.insert(request.operation.clone());
                Ok(())
            }
            ApprovalDecision::Denied => {
                Err(OrchestratorError::approval_denied(&request.operation))
            }
            ApprovalDecision::DeniedAlways => {
                let mut memory = self.memory.lock().await;
                memory.auto_approve.remove(&request.operation);
                memory.auto_deny.insert(request.operation.clone());
                Err(OrchestratorError::approval_denied(&request.operation))
            }
        }
    }

    /// Forget all remembered decisions.
    pub async fn reset(&self) {
        let mut memory = self.memory.lock().await;
        memory.auto_approve.clear();
        memory.auto_deny.clear();
    }
}
