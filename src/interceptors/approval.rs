//! Approval gate for agent permission requests
//!
//! Each pending approval is keyed by `(session_id, tool_call_id)` and backed by
//! a `oneshot` channel. Resolution removes the key before sending, so a second
//! resolution finds nothing and reports `false`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// Outcome delivered to the waiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved {
        #[serde(default, rename = "optionId", skip_serializing_if = "Option::is_none")]
        option_id: Option<String>,
    },
    Denied {
        #[serde(default, rename = "optionId", skip_serializing_if = "Option::is_none")]
        option_id: Option<String>,
    },
    /// Killed, torn down, or timed out before a decision arrived
    Cancelled,
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

type ApprovalKey = (String, String);

/// Pending-decision map
#[derive(Default)]
pub struct ApprovalGate {
    pending: Mutex<HashMap<ApprovalKey, oneshot::Sender<ApprovalDecision>>>,
}

/// Waiter half of a pending approval
pub struct PendingApproval {
    session_id: String,
    tool_call_id: String,
    rx: oneshot::Receiver<ApprovalDecision>,
}

impl PendingApproval {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    /// Wait for the decision. On timeout the entry is withdrawn and the
    /// result is `Cancelled`.
    pub async fn wait(self, gate: &ApprovalGate, timeout: Duration) -> ApprovalDecision {
        let PendingApproval {
            session_id,
            tool_call_id,
            mut rx,
        } = self;
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => ApprovalDecision::Cancelled,
            Err(_) => {
                tracing::warn!(
                    session_id = %session_id,
                    tool_call_id = %tool_call_id,
                    "Approval timed out"
                );
                gate.withdraw(&session_id, &tool_call_id).await;
                // A decision may have raced the timeout
                rx.try_recv().unwrap_or(ApprovalDecision::Cancelled)
            }
        }
    }
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending approval. An older entry under the same key is
    /// resolved `Cancelled` first.
    pub async fn request_approval(&self, session_id: &str, tool_call_id: &str) -> PendingApproval {
        let (tx, rx) = oneshot::channel();
        let key = (session_id.to_string(), tool_call_id.to_string());
        if let Some(previous) = self.pending.lock().await.insert(key, tx) {
            tracing::debug!(session_id, tool_call_id, "Replacing pending approval");
            let _ = previous.send(ApprovalDecision::Cancelled);
        }
        PendingApproval {
            session_id: session_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            rx,
        }
    }

    /// Resolve a pending approval. Returns whether an entry existed.
    pub async fn resolve_approval(
        &self,
        session_id: &str,
        tool_call_id: &str,
        decision: ApprovalDecision,
    ) -> bool {
        let key = (session_id.to_string(), tool_call_id.to_string());
        let Some(tx) = self.pending.lock().await.remove(&key) else {
            return false;
        };
        if tx.send(decision).is_err() {
            tracing::debug!(session_id, tool_call_id, "Approval waiter already gone");
        }
        true
    }

    pub async fn is_pending(&self, session_id: &str, tool_call_id: &str) -> bool {
        let key = (session_id.to_string(), tool_call_id.to_string());
        self.pending.lock().await.contains_key(&key)
    }

    /// Tool-call ids awaiting a decision for a session
    pub async fn pending_for(&self, session_id: &str) -> Vec<String> {
        let mut ids: Vec<_> = self
            .pending
            .lock()
            .await
            .keys()
            .filter(|(sid, _)| sid == session_id)
            .map(|(_, tid)| tid.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Resolve every pending approval of a session with `Cancelled`
    pub async fn cancel_session(&self, session_id: &str) -> usize {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().await;
            let keys: Vec<_> = pending
                .keys()
                .filter(|(sid, _)| sid == session_id)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| pending.remove(&k))
                .collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(ApprovalDecision::Cancelled);
        }
        if count > 0 {
            tracing::info!(session_id, count, "Cancelled pending approvals");
        }
        count
    }

    /// Resolve every pending approval with `Cancelled` (shutdown)
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().await.drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(ApprovalDecision::Cancelled);
        }
        count
    }

    async fn withdraw(&self, session_id: &str, tool_call_id: &str) {
        let key = (session_id.to_string(), tool_call_id.to_string());
        self.pending.lock().await.remove(&key);
    }
}
