//! Copilot-style adapter
//!
//! Clients speak dotted `session.*` methods and receive `session.event`
//! notifications. Calls are normalized, driven against the agent over ACP,
//! and results streamed back as events. The local session id is what the
//! client sees; the agent session is created lazily on the first prompt.

use super::{session_param, AdapterContext, ClientAdapter, RenderEvent};
use crate::error::{codes, Error, Result};
use crate::interceptors::ApprovalDecision;
use crate::rpc::{JsonRpcMessage, JsonRpcNotification, RequestId};
use crate::session::{SessionPatch, SessionStatus};
use crate::translate::{
    acp, copilot, CancelMessage, Decision, MessageMetadata, NormalizedInbound, NormalizedOutbound,
    PermissionDecisionMessage, PromptMessage, ResponseMessage, TokenUsageMessage, ToolUseMessage,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const METHODS: &[&str] = &[
    "ping",
    "session.create",
    "session.send",
    "session.abort",
    "session.destroy",
    "session.permissionResponse",
    "session.toolUse",
    "session.usage",
    "session.getMessages",
];

/// Protocol version reported by `ping`
const PROTOCOL_VERSION: u32 = 2;

/// Adapter for Copilot-style clients
#[derive(Debug, Default)]
pub struct CopilotAdapter;

impl CopilotAdapter {
    pub fn new() -> Self {
        Self
    }

    fn ping(&self, params: &Value) -> Value {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("pong");
        json!({
            "message": message,
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "protocolVersion": PROTOCOL_VERSION,
        })
    }

    async fn create(&self, ctx: &AdapterContext, params: &Value) -> Result<Value> {
        let session_id = session_param(params)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        ctx.ensure_session(&session_id).await;

        let mut metadata = Map::new();
        for key in ["model", "systemMessage", "streaming"] {
            if let Some(value) = params.get(key) {
                metadata.insert(key.to_string(), value.clone());
            }
        }
        if !metadata.is_empty() {
            ctx.sessions
                .update_session(
                    &session_id,
                    SessionPatch {
                        title: None,
                        metadata: Some(metadata),
                    },
                )
                .await?;
        }
        ctx.record(&session_id, "session.created", params).await;
        Ok(json!({"sessionId": session_id}))
    }

    /// Agent session bound to `local`, created on first use
    async fn agent_session_for(&self, ctx: &AdapterContext, local: &str) -> Result<String> {
        if let Some(existing) = ctx.agent_session(local).await {
            return Ok(existing);
        }

        let result = ctx
            .agent_request(
                Some(local),
                "session/new",
                json!({"cwd": ctx.cwd, "mcpServers": []}),
                ctx.timeouts.request_timeout(),
            )
            .await?;
        let agent_sid = session_param(&result)
            .ok_or_else(|| Error::Agent {
                code: codes::INTERNAL_ERROR,
                message: "session/new returned no sessionId".to_string(),
                data: Some(result.clone()),
            })?
            .to_string();

        if let Err(e) = ctx.sessions.bind_agent_session(local, &agent_sid).await {
            // A concurrent first prompt won the binding
            if let Some(existing) = ctx.agent_session(local).await {
                return Ok(existing);
            }
            return Err(e);
        }
        tracing::info!(session_id = local, agent_session_id = %agent_sid, "Bound agent session");
        Ok(agent_sid)
    }

    async fn send(&self, ctx: &AdapterContext, prompt: PromptMessage) -> Result<Value> {
        let local = prompt.session_id.clone();
        let request_id = prompt.request_id.clone();
        match ctx.sessions.status(&local).await {
            Some(SessionStatus::Killed) => return Err(Error::Killed(local)),
            Some(SessionStatus::Completed) => {
                return Err(Error::Validation(format!("session '{}' is completed", local)))
            }
            _ => {
                ctx.ensure_session(&local).await;
            }
        }

        let agent_sid = self.agent_session_for(ctx, &local).await?;
        let inbound = NormalizedInbound::Prompt(prompt);
        ctx.record(&local, "user.message", &serde_json::to_value(&inbound)?)
            .await;

        let call = acp::inbound_to_request(&inbound, &agent_sid)
            .ok_or_else(|| Error::Internal("prompt has no ACP form".to_string()))?;
        let result = ctx
            .agent_request(Some(&local), call.method, call.params, ctx.timeouts.prompt_timeout())
            .await;
        ctx.flush_agent_events().await;
        let result = result?;

        let stop_reason = result
            .get("stopReason")
            .and_then(Value::as_str)
            .map(str::to_string);
        let turn_end = NormalizedOutbound::Response(ResponseMessage {
            session_id: local.clone(),
            request_id,
            stop_reason: stop_reason.clone(),
            metadata: MessageMetadata::from_wire(result.get("_meta")),
        });
        let message = self.render_event(RenderEvent::Update {
            session_id: &local,
            normalized: Some(&turn_end),
            raw: &result,
        });
        ctx.forward_to_client(
            &local,
            turn_end.frame_type(),
            &serde_json::to_value(&turn_end)?,
            message,
        )
        .await;

        Ok(json!({"sessionId": local, "stopReason": stop_reason}))
    }

    async fn abort(&self, ctx: &AdapterContext, cancel: CancelMessage) -> Result<Value> {
        let local = cancel.session_id.clone();
        let inbound = NormalizedInbound::Cancel(cancel);
        ctx.record(&local, "user.cancel", &serde_json::to_value(&inbound)?)
            .await;
        ctx.approvals.cancel_session(&local).await;

        let Some(agent_sid) = ctx.agent_session(&local).await else {
            return Ok(json!({"sessionId": local, "aborted": false}));
        };
        if let Some(call) = acp::inbound_to_request(&inbound, &agent_sid) {
            ctx.agent_notify(Some(&local), call.method, call.params)
                .await?;
        }
        Ok(json!({"sessionId": local, "aborted": true}))
    }

    async fn permission_response(
        &self,
        ctx: &AdapterContext,
        response: PermissionDecisionMessage,
    ) -> Result<Value> {
        let decision = match response.decision {
            Decision::Approve => ApprovalDecision::Approved {
                option_id: response.option_id.clone(),
            },
            Decision::Deny => ApprovalDecision::Denied {
                option_id: response.option_id.clone(),
            },
        };
        let resolved = ctx
            .approvals
            .resolve_approval(&response.session_id, &response.tool_call_id, decision)
            .await;
        if !resolved {
            tracing::debug!(
                session_id = %response.session_id,
                tool_call_id = %response.tool_call_id,
                "Permission response for no pending request"
            );
        }
        let session_id = response.session_id.clone();
        let tool_call_id = response.tool_call_id.clone();
        ctx.record(
            &session_id,
            "permission.response",
            &serde_json::to_value(NormalizedInbound::PermissionDecision(response))?,
        )
        .await;
        Ok(json!({"sessionId": session_id, "toolCallId": tool_call_id, "resolved": resolved}))
    }

    async fn tool_use(&self, ctx: &AdapterContext, tool: ToolUseMessage) -> Result<Value> {
        let session_id = tool.session_id.clone();
        let tool_call_id = tool.tool_call_id.clone();
        ctx.ensure_session(&session_id).await;
        ctx.record(
            &session_id,
            "tool.user_requested",
            &serde_json::to_value(NormalizedInbound::ToolUse(tool))?,
        )
        .await;
        Ok(json!({"sessionId": session_id, "toolCallId": tool_call_id, "recorded": true}))
    }

    async fn usage(&self, ctx: &AdapterContext, report: TokenUsageMessage) -> Result<Value> {
        let session_id = report.session_id.clone();
        let usage = serde_json::to_value(&report.usage)?;
        ctx.ensure_session(&session_id).await;

        let mut metadata = Map::new();
        metadata.insert("usage".to_string(), usage.clone());
        ctx.sessions
            .update_session(
                &session_id,
                SessionPatch {
                    title: None,
                    metadata: Some(metadata),
                },
            )
            .await?;
        ctx.record(
            &session_id,
            "assistant.usage",
            &serde_json::to_value(NormalizedInbound::TokenUsage(report))?,
        )
        .await;
        Ok(json!({"sessionId": session_id, "usage": usage}))
    }
}

fn required_session(method: &str, params: &Value) -> Result<String> {
    session_param(params)
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("{} requires sessionId", method)))
}

#[async_trait]
impl ClientAdapter for CopilotAdapter {
    fn name(&self) -> &'static str {
        "copilot"
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
        match method {
            "ping" => Ok(self.ping(&params)),
            "session.create" => self.create(ctx, &params).await,
            "session.destroy" => {
                let session_id = required_session(method, &params)?;
                let destroyed = ctx.end_session(&session_id).await;
                Ok(json!({"sessionId": session_id, "destroyed": destroyed}))
            }
            "session.getMessages" => {
                let session_id = required_session(method, &params)?;
                let frames = ctx.recorder.frames(&session_id).await;
                Ok(json!({"sessionId": session_id, "events": frames}))
            }
            _ => match copilot::decode_request(method, &params)? {
                NormalizedInbound::Prompt(prompt) => self.send(ctx, prompt).await,
                NormalizedInbound::Cancel(cancel) => self.abort(ctx, cancel).await,
                NormalizedInbound::PermissionDecision(response) => {
                    self.permission_response(ctx, response).await
                }
                NormalizedInbound::ToolUse(tool) => self.tool_use(ctx, tool).await,
                NormalizedInbound::TokenUsage(report) => self.usage(ctx, report).await,
                NormalizedInbound::Noop(noop) => Err(Error::Validation(
                    noop.reason
                        .unwrap_or_else(|| format!("{} could not be interpreted", method)),
                )),
            },
        }
    }

    fn render_event(&self, event: RenderEvent<'_>) -> Option<JsonRpcMessage> {
        let (session_id, event) = match event {
            RenderEvent::Update {
                session_id,
                normalized,
                ..
            } => (session_id, copilot::encode_outbound(normalized?)?),
            RenderEvent::Permission {
                session_id,
                request,
                ..
            } => (
                session_id,
                copilot::encode_outbound(&NormalizedOutbound::PermissionRequest(request.clone()))?,
            ),
            // Copilot clients cannot answer arbitrary agent requests
            RenderEvent::AgentRequest { .. } => return None,
        };
        Some(JsonRpcMessage::Notification(JsonRpcNotification::new(
            copilot::EVENT_METHOD,
            event.into_params(session_id),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::harness;
    use crate::translate::{MessageChunk, PermissionRequest};
    use std::time::Duration;

    fn event_of(msg: &JsonRpcMessage) -> (String, Value) {
        match msg {
            JsonRpcMessage::Notification(n) => {
                assert_eq!(n.method, "session.event");
                let params = n.params.clone().unwrap();
                (
                    params["event"]["type"].as_str().unwrap().to_string(),
                    params,
                )
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let h = harness();
        let result = CopilotAdapter::new()
            .handle(&h.ctx, Some(&RequestId::from(1)), "ping", json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(result["message"], "hi");
        assert_eq!(result["protocolVersion"], 2);
        assert!(result["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_metadata() {
        let h = harness();
        let adapter = CopilotAdapter::new();
        let generated = adapter
            .handle(&h.ctx, None, "session.create", json!({"model": "gpt"}))
            .await
            .unwrap();
        let id = generated["sessionId"].as_str().unwrap();
        let record = h.ctx.sessions.get(id).await.unwrap();
        assert_eq!(record.metadata["model"], "gpt");

        let explicit = adapter
            .handle(&h.ctx, None, "session.create", json!({"sessionId": "mine"}))
            .await
            .unwrap();
        assert_eq!(explicit, json!({"sessionId": "mine"}));
    }

    #[tokio::test]
    async fn test_send_creates_agent_session_and_ends_turn() {
        let mut h = harness();
        let ctx = h.ctx.clone();
        let call = tokio::spawn(async move {
            CopilotAdapter::new()
                .handle(
                    &ctx,
                    None,
                    "session.send",
                    json!({"sessionId": "local-1", "prompt": "hello", "thought": "plan"}),
                )
                .await
        });

        let new = h.agent.next().await;
        assert_eq!(new["method"], "session/new");
        assert_eq!(new["params"], json!({"cwd": "/work", "mcpServers": []}));
        h.agent
            .send(json!({"jsonrpc": "2.0", "id": new["id"], "result": {"sessionId": "agent-1"}}))
            .await;

        let prompt = h.agent.next().await;
        assert_eq!(prompt["method"], "session/prompt");
        assert_eq!(prompt["params"]["sessionId"], "agent-1");
        assert_eq!(prompt["params"]["prompt"][0]["text"], "hello");
        assert_eq!(prompt["params"]["_meta"]["thought"], "plan");
        h.agent
            .send(json!({"jsonrpc": "2.0", "id": prompt["id"], "result": {"stopReason": "end_turn"}}))
            .await;

        let result = call.await.unwrap().unwrap();
        assert_eq!(result, json!({"sessionId": "local-1", "stopReason": "end_turn"}));
        assert_eq!(h.ctx.agent_session("local-1").await.as_deref(), Some("agent-1"));

        let (event_type, params) = event_of(&h.next_client_message().await);
        assert_eq!(event_type, "assistant.turn_end");
        assert_eq!(params["sessionId"], "local-1");
        assert_eq!(params["event"]["data"]["stopReason"], "end_turn");
    }

    #[tokio::test]
    async fn test_send_rejected_for_terminal_sessions() {
        let h = harness();
        let adapter = CopilotAdapter::new();
        h.ctx.ensure_session("killed").await;
        h.ctx.kill_session("killed").await;
        let err = adapter
            .handle(&h.ctx, None, "session.send", json!({"sessionId": "killed", "prompt": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Killed(_)));

        h.ctx.ensure_session("done").await;
        h.ctx.end_session("done").await;
        let err = adapter
            .handle(&h.ctx, None, "session.send", json!({"sessionId": "done", "prompt": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(h.ctx.agent.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_without_prompt_is_invalid() {
        let h = harness();
        let err = CopilotAdapter::new()
            .handle(&h.ctx, None, "session.send", json!({"sessionId": "s1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = CopilotAdapter::new()
            .handle(&h.ctx, None, "session.send", json!({"prompt": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_permission_response_resolves_once() {
        let h = harness();
        let adapter = CopilotAdapter::new();
        let pending = h.ctx.approvals.request_approval("s1", "tc1").await;

        let params = json!({"sessionId": "s1", "toolCallId": "tc1", "approved": true, "optionId": "allow"});
        let first = adapter
            .handle(&h.ctx, None, "session.permissionResponse", params.clone())
            .await
            .unwrap();
        assert_eq!(first["resolved"], true);
        let second = adapter
            .handle(&h.ctx, None, "session.permissionResponse", params)
            .await
            .unwrap();
        assert_eq!(second["resolved"], false);

        let decision = pending.wait(&h.ctx.approvals, Duration::from_secs(1)).await;
        assert_eq!(
            decision,
            ApprovalDecision::Approved {
                option_id: Some("allow".into())
            }
        );
    }

    #[tokio::test]
    async fn test_destroy_cancels_approvals() {
        let h = harness();
        h.ctx.ensure_session("s1").await;
        let pending = h.ctx.approvals.request_approval("s1", "tc1").await;

        let result = CopilotAdapter::new()
            .handle(&h.ctx, None, "session.destroy", json!({"sessionId": "s1"}))
            .await
            .unwrap();
        assert_eq!(result["destroyed"], true);
        assert_eq!(
            pending.wait(&h.ctx.approvals, Duration::from_secs(1)).await,
            ApprovalDecision::Cancelled
        );
        assert_eq!(h.ctx.sessions.status("s1").await, Some(SessionStatus::Completed));
    }

    #[tokio::test]
    async fn test_usage_and_tool_use_recorded() {
        let h = harness();
        let adapter = CopilotAdapter::new();
        adapter
            .handle(
                &h.ctx,
                None,
                "session.usage",
                json!({"sessionId": "s1", "usage": {"inputTokens": 10, "outputTokens": 5}}),
            )
            .await
            .unwrap();
        adapter
            .handle(
                &h.ctx,
                None,
                "session.toolUse",
                json!({"sessionId": "s1", "toolCallId": "tc9", "toolName": "bash", "command": "ls"}),
            )
            .await
            .unwrap();

        let record = h.ctx.sessions.get("s1").await.unwrap();
        assert_eq!(record.metadata["usage"]["inputTokens"], 10);

        let messages = adapter
            .handle(&h.ctx, None, "session.getMessages", json!({"sessionId": "s1"}))
            .await
            .unwrap();
        let types: Vec<_> = messages["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["assistant.usage", "tool.user_requested"]);
    }

    #[test]
    fn test_render_chunk_and_permission() {
        let adapter = CopilotAdapter::new();
        let chunk = NormalizedOutbound::MessageChunk(MessageChunk {
            session_id: "local-1".into(),
            request_id: None,
            text: "Hi".into(),
            metadata: Default::default(),
        });
        let msg = adapter
            .render_event(RenderEvent::Update {
                session_id: "local-1",
                normalized: Some(&chunk),
                raw: &Value::Null,
            })
            .unwrap();
        let (event_type, params) = event_of(&msg);
        assert_eq!(event_type, "assistant.message_delta");
        assert_eq!(params["event"]["data"]["deltaContent"], "Hi");

        let request = PermissionRequest {
            session_id: "local-1".into(),
            request_id: None,
            tool_call_id: "tc1".into(),
            title: Some("rm -rf".into()),
            options: vec![],
            metadata: Default::default(),
        };
        let approval_id = RequestId::from("approval:x");
        let msg = adapter
            .render_event(RenderEvent::Permission {
                session_id: "local-1",
                request: &request,
                raw: &Value::Null,
                approval_id: &approval_id,
            })
            .unwrap();
        let (event_type, params) = event_of(&msg);
        assert_eq!(event_type, "permission.requested");
        assert_eq!(params["event"]["data"]["toolCallId"], "tc1");

        assert!(adapter
            .render_event(RenderEvent::Update {
                session_id: "local-1",
                normalized: None,
                raw: &Value::Null,
            })
            .is_none());
    }
}
