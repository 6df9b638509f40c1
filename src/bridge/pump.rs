//! Agent event pump
//!
//! A single task consumes agent events in arrival order, so per-session
//! update order is preserved on the way to the client. Permission waits are
//! spawned off the pump and never hold it up.

use crate::adapters::{session_param, AdapterContext, ClientAdapter, RenderEvent};
use crate::agent::AgentEvent;
use crate::error::{codes, Error};
use crate::interceptors::ApprovalDecision;
use crate::rpc::RequestId;
use crate::translate::{
    acp, ErrorBody, ErrorMessage, MessageMetadata, NormalizedOutbound, PermissionOption,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Prefix of ids the bridge uses for permission requests sent to the client
pub const APPROVAL_ID_PREFIX: &str = "approval:";

/// Prefix of ids the bridge uses for agent requests relayed to the client
pub const RELAY_ID_PREFIX: &str = "agent:";

/// Work item consumed by the pump
#[derive(Debug)]
pub enum PumpItem {
    Agent(AgentEvent),
    /// Answered once every item queued before it has been processed
    Flush(oneshot::Sender<()>),
}

impl From<AgentEvent> for PumpItem {
    fn from(event: AgentEvent) -> Self {
        Self::Agent(event)
    }
}

/// Client-facing id for a parked permission request
pub fn approval_request_id(session_id: &str, tool_call_id: &str) -> RequestId {
    RequestId::Str(format!(
        "{}{}",
        APPROVAL_ID_PREFIX,
        json!([session_id, tool_call_id])
    ))
}

/// Inverse of [`approval_request_id`]
pub fn parse_approval_id(id: &RequestId) -> Option<(String, String)> {
    let RequestId::Str(raw) = id else {
        return None;
    };
    let rest = raw.strip_prefix(APPROVAL_ID_PREFIX)?;
    let (session_id, tool_call_id): (String, String) = serde_json::from_str(rest).ok()?;
    Some((session_id, tool_call_id))
}

/// Client-facing id for a relayed agent request
pub fn relay_request_id(agent_id: &RequestId) -> RequestId {
    let encoded = serde_json::to_string(agent_id).unwrap_or_else(|_| agent_id.to_string());
    RequestId::Str(format!("{}{}", RELAY_ID_PREFIX, encoded))
}

/// Inverse of [`relay_request_id`]
pub fn parse_relay_id(id: &RequestId) -> Option<RequestId> {
    let RequestId::Str(raw) = id else {
        return None;
    };
    serde_json::from_str(raw.strip_prefix(RELAY_ID_PREFIX)?).ok()
}

/// Drain the pump until every sender is gone
pub async fn run(
    ctx: Arc<AdapterContext>,
    renderer: Arc<dyn ClientAdapter>,
    mut rx: mpsc::UnboundedReceiver<PumpItem>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            PumpItem::Flush(done) => {
                let _ = done.send(());
            }
            PumpItem::Agent(event) => handle_event(&ctx, renderer.as_ref(), event).await,
        }
    }
    tracing::debug!("Agent event pump stopped");
}

async fn handle_event(ctx: &Arc<AdapterContext>, renderer: &dyn ClientAdapter, event: AgentEvent) {
    match event {
        AgentEvent::Notification { method, params } if method == "session/update" => {
            on_update(ctx, renderer, params).await
        }
        AgentEvent::Notification { method, .. } => {
            tracing::debug!(method = %method, "Ignoring agent notification");
        }
        AgentEvent::Request { id, method, params } if method == "session/request_permission" => {
            on_permission(ctx, renderer, id, params).await
        }
        AgentEvent::Request { id, method, params } => {
            on_agent_request(ctx, renderer, id, &method, params).await
        }
        AgentEvent::Exited { reason } => on_exit(ctx, renderer, &reason).await,
    }
}

async fn on_update(ctx: &AdapterContext, renderer: &dyn ClientAdapter, mut params: Value) {
    let Some(agent_sid) = session_param(&params).map(str::to_string) else {
        tracing::warn!("session/update without sessionId dropped");
        return;
    };
    let local = ctx.local_session(&agent_sid).await;

    let mut normalized = match acp::update_to_outbound(&params) {
        Ok(normalized) => normalized,
        Err(e) => {
            tracing::warn!(session_id = %local, "Untranslatable session/update: {}", e);
            ctx.record(
                &local,
                "translation.error",
                &json!({"error": e.to_string(), "params": params}),
            )
            .await;
            None
        }
    };
    if let Some(msg) = normalized.as_mut() {
        msg.set_session_id(&local);
    }
    if local != agent_sid {
        params["sessionId"] = json!(local);
    }

    let frame_type = normalized
        .as_ref()
        .map(NormalizedOutbound::frame_type)
        .unwrap_or("session.update");
    let payload = normalized
        .as_ref()
        .and_then(|msg| serde_json::to_value(msg).ok())
        .unwrap_or_else(|| params.clone());
    let message = renderer.render_event(RenderEvent::Update {
        session_id: &local,
        normalized: normalized.as_ref(),
        raw: &params,
    });
    ctx.forward_to_client(&local, frame_type, &payload, message)
        .await;
}

async fn on_permission(
    ctx: &Arc<AdapterContext>,
    renderer: &dyn ClientAdapter,
    id: RequestId,
    mut params: Value,
) {
    let mut request = match acp::permission_request_to_outbound(&params) {
        Ok(NormalizedOutbound::PermissionRequest(request)) => request,
        Ok(_) => return,
        Err(e) => {
            tracing::warn!("Malformed permission request: {}", e);
            let err = Error::Validation(e.to_string());
            if let Err(e) = ctx.agent.respond_error(id, &err).await {
                tracing::debug!("Could not answer permission request: {}", e);
            }
            return;
        }
    };

    let local = ctx.local_session(&request.session_id).await;
    request.session_id = local.clone();
    params["sessionId"] = json!(local);
    let tool_call_id = request.tool_call_id.clone();
    let options = request.options.clone();

    let pending = ctx.approvals.request_approval(&local, &tool_call_id).await;
    let approval_id = approval_request_id(&local, &tool_call_id);
    let message = renderer.render_event(RenderEvent::Permission {
        session_id: &local,
        request: &request,
        raw: &params,
        approval_id: &approval_id,
    });
    let payload = serde_json::to_value(NormalizedOutbound::PermissionRequest(request))
        .unwrap_or_else(|_| params.clone());
    let forwarded = ctx
        .forward_to_client(&local, "permission.requested", &payload, message)
        .await;
    if !forwarded {
        // Nobody can answer: killed session or a dialect without permission UI
        ctx.approvals
            .resolve_approval(&local, &tool_call_id, ApprovalDecision::Cancelled)
            .await;
    }

    let ctx = ctx.clone();
    tokio::spawn(async move {
        let decision = pending
            .wait(&ctx.approvals, ctx.timeouts.approval_timeout())
            .await;
        let decision = classify(decision, &options);
        tracing::info!(
            session_id = %local,
            tool_call_id = %tool_call_id,
            approved = decision.is_approved(),
            "Permission decided"
        );
        ctx.record(
            &local,
            "permission.resolved",
            &json!({"toolCallId": tool_call_id, "decision": decision}),
        )
        .await;
        let outcome = acp::permission_outcome(&decision, &options);
        if let Err(e) = ctx.agent.respond(id, outcome).await {
            tracing::debug!(session_id = %local, "Could not answer permission request: {}", e);
        }
    });
}

/// A selected option of kind `reject_*` is a denial whatever the answering path
fn classify(decision: ApprovalDecision, options: &[PermissionOption]) -> ApprovalDecision {
    match decision {
        ApprovalDecision::Approved {
            option_id: Some(option_id),
        } if options
            .iter()
            .any(|o| o.option_id == option_id && o.is_reject()) =>
        {
            ApprovalDecision::Denied {
                option_id: Some(option_id),
            }
        }
        other => other,
    }
}

async fn on_agent_request(
    ctx: &AdapterContext,
    renderer: &dyn ClientAdapter,
    id: RequestId,
    method: &str,
    params: Value,
) {
    if let Some(sid) = session_param(&params) {
        let local = ctx.local_session(sid).await;
        if ctx.kill_switch.is_killed(&local).await {
            tracing::debug!(session_id = %local, method, "Refusing agent request for killed session");
            if let Err(e) = ctx.agent.respond_error(id, &Error::Killed(local)).await {
                tracing::debug!("Could not answer agent request: {}", e);
            }
            return;
        }
    }

    let relay_id = relay_request_id(&id);
    match renderer.render_event(RenderEvent::AgentRequest {
        relay_id: &relay_id,
        method,
        params: &params,
    }) {
        Some(message) => {
            tracing::debug!(method, relay_id = %relay_id, "Relaying agent request to client");
            ctx.send_to_client(message);
        }
        None => {
            tracing::debug!(method, "Agent request has no client form");
            let err = Error::Routing(method.to_string());
            if let Err(e) = ctx.agent.respond_error(id, &err).await {
                tracing::debug!("Could not answer agent request: {}", e);
            }
        }
    }
}

async fn on_exit(ctx: &AdapterContext, renderer: &dyn ClientAdapter, reason: &str) {
    tracing::warn!(reason, "ACP agent exited");
    ctx.approvals.cancel_all().await;

    for session_id in ctx.sessions.active_ids().await {
        let error = NormalizedOutbound::Error(ErrorMessage {
            session_id: session_id.clone(),
            request_id: None,
            error: ErrorBody {
                code: codes::CLOSED,
                message: format!("Agent exited: {}", reason),
            },
            metadata: MessageMetadata::default(),
        });
        let raw = acp::outbound_to_update(&error).unwrap_or(Value::Null);
        let payload = serde_json::to_value(&error).unwrap_or(Value::Null);
        let message = renderer.render_event(RenderEvent::Update {
            session_id: &session_id,
            normalized: Some(&error),
            raw: &raw,
        });
        ctx.forward_to_client(&session_id, error.frame_type(), &payload, message)
            .await;
        ctx.end_session(&session_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_id_roundtrip() {
        let id = approval_request_id("s:1", "tc\"2");
        assert_eq!(
            parse_approval_id(&id),
            Some(("s:1".to_string(), "tc\"2".to_string()))
        );
        assert_eq!(parse_approval_id(&RequestId::from(7)), None);
        assert_eq!(parse_approval_id(&RequestId::from("agent:1")), None);
    }

    #[test]
    fn test_relay_id_keeps_id_type() {
        let numeric = relay_request_id(&RequestId::from(42));
        assert_eq!(numeric, RequestId::from("agent:42"));
        assert_eq!(parse_relay_id(&numeric), Some(RequestId::from(42)));

        let text = relay_request_id(&RequestId::from("x"));
        assert_eq!(parse_relay_id(&text), Some(RequestId::from("x")));
    }

    #[test]
    fn test_classify_reject_option() {
        let options = vec![
            PermissionOption {
                option_id: "allow".into(),
                name: "Allow".into(),
                kind: "allow_once".into(),
            },
            PermissionOption {
                option_id: "no".into(),
                name: "Reject".into(),
                kind: "reject_once".into(),
            },
        ];
        let approved = ApprovalDecision::Approved {
            option_id: Some("no".into()),
        };
        assert_eq!(
            classify(approved, &options),
            ApprovalDecision::Denied {
                option_id: Some("no".into())
            }
        );
        let allow = ApprovalDecision::Approved {
            option_id: Some("allow".into()),
        };
        assert_eq!(classify(allow.clone(), &options), allow);
    }
}
