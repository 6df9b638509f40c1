//! Claude-style adapter placeholder
//!
//! Reserved for the Claude streaming dialect. Declares no methods, so the
//! routing table never sends it traffic; direct calls fail as unroutable.

use super::{AdapterContext, ClientAdapter, RenderEvent};
use crate::error::{Error, Result};
use crate::rpc::{JsonRpcMessage, RequestId};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct ClaudeAdapter;

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClientAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn supported_methods(&self) -> &'static [&'static str] {
        &[]
    }

    async fn handle(
        &self,
        _ctx: &AdapterContext,
        _id: Option<&RequestId>,
        method: &str,
        _params: Value,
    ) -> Result<Value> {
        Err(Error::Routing(format!(
            "{} (claude dialect is not implemented)",
            method
        )))
    }

    fn render_event(&self, _event: RenderEvent<'_>) -> Option<JsonRpcMessage> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::harness;
    use crate::error::codes;
    use serde_json::json;

    #[tokio::test]
    async fn test_declares_nothing_and_always_fails() {
        let h = harness();
        let adapter = ClaudeAdapter::new();
        assert!(adapter.supported_methods().is_empty());
        let err = adapter
            .handle(&h.ctx, None, "messages.create", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.rpc_code(), codes::METHOD_NOT_FOUND);
    }
}
