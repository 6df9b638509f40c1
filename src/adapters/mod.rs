//! Client protocol adapters
//!
//! Each adapter speaks one client dialect. It declares the methods it owns,
//! handles them against the shared [`AdapterContext`], and renders
//! agent-originated traffic into its dialect.

mod acp;
mod claude;
mod context;
mod copilot;

pub use acp::AcpAdapter;
pub use claude::ClaudeAdapter;
pub use context::AdapterContext;
pub use copilot::CopilotAdapter;

#[cfg(test)]
pub(crate) use context::testing;

use crate::config::ClientDialect;
use crate::error::Result;
use crate::rpc::{JsonRpcMessage, RequestId};
use crate::translate::{NormalizedOutbound, PermissionRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Agent-originated traffic bound for the client
#[derive(Debug, Clone, Copy)]
pub enum RenderEvent<'a> {
    /// A `session/update`, already re-addressed to the local session id.
    /// `normalized` is `None` when the translator dropped the update.
    Update {
        session_id: &'a str,
        normalized: Option<&'a NormalizedOutbound>,
        raw: &'a Value,
    },
    /// A permission request parked in the approval gate. Clients answering
    /// with a JSON-RPC response use `approval_id`.
    Permission {
        session_id: &'a str,
        request: &'a PermissionRequest,
        raw: &'a Value,
        approval_id: &'a RequestId,
    },
    /// Any other agent request. A client response to `relay_id` is relayed
    /// back to the agent.
    AgentRequest {
        relay_id: &'a RequestId,
        method: &'a str,
        params: &'a Value,
    },
}

/// One client dialect
#[async_trait]
pub trait ClientAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Methods this adapter owns, in declaration order
    fn supported_methods(&self) -> &'static [&'static str];

    /// Handle a routed client call. Notifications have no `id`.
    async fn handle(
        &self,
        ctx: &AdapterContext,
        id: Option<&RequestId>,
        method: &str,
        params: Value,
    ) -> Result<Value>;

    /// Render agent traffic for this dialect's client, or `None` to drop it
    fn render_event(&self, event: RenderEvent<'_>) -> Option<JsonRpcMessage>;
}

/// Adapter set for a client dialect
pub fn adapters_for(dialect: ClientDialect) -> Vec<Arc<dyn ClientAdapter>> {
    match dialect {
        ClientDialect::Acp => vec![Arc::new(AcpAdapter::new())],
        ClientDialect::Copilot => vec![Arc::new(CopilotAdapter::new())],
        ClientDialect::Claude => vec![Arc::new(ClaudeAdapter::new())],
    }
}

/// `params.sessionId` as a string
pub(crate) fn session_param(params: &Value) -> Option<&str> {
    params.get("sessionId").and_then(Value::as_str)
}
