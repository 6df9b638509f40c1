//! ACP passthrough adapter
//!
//! The client already speaks ACP: calls are forwarded unchanged and results
//! (or agent errors) relayed verbatim. The bridge only observes: it registers
//! sessions, records frames, and applies the interceptors.

use super::{session_param, AdapterContext, ClientAdapter, RenderEvent};
use crate::error::{Error, Result};
use crate::rpc::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId};
use async_trait::async_trait;
use serde_json::Value;

const METHODS: &[&str] = &[
    "initialize",
    "authenticate",
    "session/new",
    "session/load",
    "session/prompt",
    "session/cancel",
    "session/set_mode",
    "session/set_model",
];

/// Adapter for clients speaking ACP directly
#[derive(Debug, Default)]
pub struct AcpAdapter;

impl AcpAdapter {
    pub fn new() -> Self {
        Self
    }

    async fn register(&self, ctx: &AdapterContext, session_id: &str, result: &Value) -> Result<()> {
        ctx.ensure_session(session_id).await;
        ctx.sessions.bind_agent_session(session_id, session_id).await?;
        ctx.record(session_id, "session.created", result).await;
        Ok(())
    }
}

#[async_trait]
impl ClientAdapter for AcpAdapter {
    fn name(&self) -> &'static str {
        "acp"
    }

    fn supported_methods(&self) -> &'static [&'static str] {
        METHODS
    }

    async fn handle(
        &self,
        ctx: &AdapterContext,
        _id: Option<&RequestId>,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let session_id = session_param(&params).map(str::to_string);
        let sid = session_id.as_deref();
        let request_timeout = ctx.timeouts.request_timeout();

        match method {
            "session/new" => {
                let result = ctx.agent_request(None, method, params, request_timeout).await?;
                if let Some(created) = session_param(&result) {
                    self.register(ctx, created, &result).await?;
                }
                Ok(result)
            }
            "session/load" => {
                let result = ctx.agent_request(sid, method, params, request_timeout).await?;
                if let Some(sid) = sid {
                    self.register(ctx, sid, &result).await?;
                }
                Ok(result)
            }
            "session/prompt" => {
                let sid = sid.ok_or_else(|| {
                    Error::Validation("session/prompt requires sessionId".to_string())
                })?;
                ctx.ensure_session(sid).await;
                ctx.record(sid, "user.message", &params).await;

                let result = ctx
                    .agent_request(Some(sid), method, params, ctx.timeouts.prompt_timeout())
                    .await;
                // Updates streamed during the turn reach the client before the result
                ctx.flush_agent_events().await;

                let result = result?;
                ctx.record(sid, "assistant.turn_end", &result).await;
                Ok(result)
            }
            "session/cancel" => {
                if let Some(sid) = sid {
                    ctx.record(sid, "user.cancel", &params).await;
                }
                ctx.agent_notify(sid, method, params).await?;
                Ok(Value::Null)
            }
            _ => ctx.agent_request(sid, method, params, request_timeout).await,
        }
    }

    fn render_event(&self, event: RenderEvent<'_>) -> Option<JsonRpcMessage> {
        match event {
            RenderEvent::Update { raw, .. } => Some(JsonRpcMessage::Notification(
                JsonRpcNotification::new("session/update", raw.clone()),
            )),
            RenderEvent::Permission {
                raw, approval_id, ..
            } => Some(JsonRpcMessage::Request(JsonRpcRequest::new(
                approval_id.clone(),
                "session/request_permission",
                raw.clone(),
            ))),
            RenderEvent::AgentRequest {
                relay_id,
                method,
                params,
            } => Some(JsonRpcMessage::Request(JsonRpcRequest::new(
                relay_id.clone(),
                method,
                params.clone(),
            ))),
        }
    }
}
