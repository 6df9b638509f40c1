//! Copilot-style wire shapes ↔ normalized messages
//!
//! Requests use `session.*` method names with camelCase params. Agent output
//! is delivered as `session.event` notifications carrying `{type, data}`.

use super::normalized::*;
use crate::error::codes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Notification method carrying session events to the client
pub const EVENT_METHOD: &str = "session.event";

/// One session event as seen by a Copilot-style client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopilotEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl CopilotEvent {
    pub fn new(event_type: &str, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            data,
        }
    }

    /// `session.event` notification params
    pub fn into_params(self, session_id: &str) -> Value {
        json!({"sessionId": session_id, "event": self})
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| str_field(obj, k))
}

/// Read `thought` / `usage` from the top level of a params object
fn metadata_of(obj: &Map<String, Value>) -> MessageMetadata {
    MessageMetadata {
        thought: str_field(obj, "thought"),
        usage: obj.get("usage").and_then(Usage::from_wire),
    }
}

fn write_metadata(target: &mut Map<String, Value>, metadata: &MessageMetadata) {
    metadata.write_wire(target);
}

fn parse_decision(obj: &Map<String, Value>) -> Option<Decision> {
    if let Some(approved) = obj.get("approved").and_then(Value::as_bool) {
        return Some(if approved { Decision::Approve } else { Decision::Deny });
    }
    let raw = first_str(obj, &["decision", "kind"])?;
    match raw.as_str() {
        "approve" | "approved" | "allow" | "allowed" => Some(Decision::Approve),
        r if r.starts_with("deny") || r.starts_with("denied") || r.starts_with("reject") => {
            Some(Decision::Deny)
        }
        _ => None,
    }
}

fn noop(session_id: &str, reason: impl Into<String>) -> Result<NormalizedInbound, TranslationError> {
    Ok(NormalizedInbound::Noop(NoopMessage::because(Some(session_id), reason)))
}

/// Decode a client request into a normalized message.
///
/// A params object without `sessionId` is a structural error. Requests with
/// no normalized counterpart, or with missing kind-specific fields, become
/// `noop`.
pub fn decode_request(method: &str, params: &Value) -> Result<NormalizedInbound, TranslationError> {
    let obj = params
        .as_object()
        .ok_or_else(|| TranslationError::InvalidShape(format!("{} params must be an object", method)))?;
    let session_id = str_field(obj, "sessionId").ok_or(TranslationError::MissingField("sessionId"))?;
    let request_id = str_field(obj, "requestId");
    let metadata = metadata_of(obj);

    let msg = match method {
        "session.send" => {
            let Some(text) = first_str(obj, &["prompt", "message", "text"]) else {
                return noop(&session_id, "session.send without prompt");
            };
            NormalizedInbound::Prompt(PromptMessage {
                session_id,
                request_id,
                text,
                metadata,
            })
        }
        "session.abort" => NormalizedInbound::Cancel(CancelMessage {
            session_id,
            request_id,
            metadata,
        }),
        "session.permissionResponse" => {
            let (Some(tool_call_id), Some(decision)) = (str_field(obj, "toolCallId"), parse_decision(obj))
            else {
                return noop(&session_id, "permission response without toolCallId or decision");
            };
            NormalizedInbound::PermissionDecision(PermissionDecisionMessage {
                session_id,
                request_id,
                tool_call_id,
                decision,
                option_id: str_field(obj, "optionId"),
                metadata,
            })
        }
        "session.toolUse" => {
            let (Some(tool_call_id), Some(tool_name)) =
                (str_field(obj, "toolCallId"), str_field(obj, "toolName"))
            else {
                return noop(&session_id, "toolUse without toolCallId or toolName");
            };
            NormalizedInbound::ToolUse(ToolUseMessage {
                session_id,
                request_id,
                tool_call_id,
                tool_name,
                command: str_field(obj, "command"),
                input: obj.get("input").or_else(|| obj.get("arguments")).cloned(),
                metadata,
            })
        }
        "session.usage" => {
            let Some(usage) = metadata.usage.clone() else {
                return noop(&session_id, "usage report without counters");
            };
            NormalizedInbound::TokenUsage(TokenUsageMessage {
                session_id,
                request_id,
                usage,
                metadata: MessageMetadata {
                    thought: metadata.thought,
                    usage: None,
                },
            })
        }
        other => return noop(&session_id, format!("{} has no normalized form", other)),
    };
    Ok(msg)
}

/// Encode a normalized inbound message as a Copilot request `(method, params)`
pub fn encode_inbound(msg: &NormalizedInbound) -> Option<(&'static str, Value)> {
    let mut p = Map::new();
    let method = match msg {
        NormalizedInbound::Prompt(m) => {
            p.insert("sessionId".into(), json!(m.session_id));
            p.insert("prompt".into(), json!(m.text));
            write_common(&mut p, &m.request_id, &m.metadata);
            "session.send"
        }
        NormalizedInbound::Cancel(m) => {
            p.insert("sessionId".into(), json!(m.session_id));
            write_common(&mut p, &m.request_id, &m.metadata);
            "session.abort"
        }
        NormalizedInbound::PermissionDecision(m) => {
            p.insert("sessionId".into(), json!(m.session_id));
            p.insert("toolCallId".into(), json!(m.tool_call_id));
            p.insert("approved".into(), json!(m.decision == Decision::Approve));
            if let Some(option_id) = &m.option_id {
                p.insert("optionId".into(), json!(option_id));
            }
            write_common(&mut p, &m.request_id, &m.metadata);
            "session.permissionResponse"
        }
        NormalizedInbound::ToolUse(m) => {
            p.insert("sessionId".into(), json!(m.session_id));
            p.insert("toolCallId".into(), json!(m.tool_call_id));
            p.insert("toolName".into(), json!(m.tool_name));
            if let Some(command) = &m.command {
                p.insert("command".into(), json!(command));
            }
            if let Some(input) = &m.input {
                p.insert("input".into(), input.clone());
            }
            write_common(&mut p, &m.request_id, &m.metadata);
            "session.toolUse"
        }
        NormalizedInbound::TokenUsage(m) => {
            p.insert("sessionId".into(), json!(m.session_id));
            let merged = MessageMetadata {
                thought: m.metadata.thought.clone(),
                usage: Some(m.usage.clone()),
            };
            write_common(&mut p, &m.request_id, &merged);
            "session.usage"
        }
        NormalizedInbound::Noop(_) => return None,
    };
    Some((method, Value::Object(p)))
}

fn write_common(p: &mut Map<String, Value>, request_id: &Option<String>, metadata: &MessageMetadata) {
    if let Some(id) = request_id {
        p.insert("requestId".into(), json!(id));
    }
    write_metadata(p, metadata);
}

/// Encode a normalized outbound message as a session event
pub fn encode_outbound(msg: &NormalizedOutbound) -> Option<CopilotEvent> {
    let mut d = Map::new();
    let event_type = match msg {
        NormalizedOutbound::MessageChunk(m) => {
            d.insert("deltaContent".into(), json!(m.text));
            write_common(&mut d, &m.request_id, &m.metadata);
            "assistant.message_delta"
        }
        NormalizedOutbound::ToolCall(m) => {
            d.insert("toolCallId".into(), json!(m.tool_call_id));
            d.insert("toolName".into(), json!(m.title));
            if let Some(kind) = &m.tool_kind {
                d.insert("toolKind".into(), json!(kind));
            }
            if let Some(status) = &m.status {
                d.insert("status".into(), json!(status));
            }
            if let Some(args) = &m.raw_input {
                d.insert("arguments".into(), args.clone());
            }
            write_common(&mut d, &m.request_id, &m.metadata);
            "tool.execution_start"
        }
        NormalizedOutbound::ToolCallUpdate(m) if m.is_final() => {
            d.insert("toolCallId".into(), json!(m.tool_call_id));
            d.insert("success".into(), json!(m.status.as_deref() == Some("completed")));
            if let Some(title) = &m.title {
                d.insert("title".into(), json!(title));
            }
            if let Some(content) = &m.content {
                d.insert("result".into(), content.clone());
            }
            if let Some(raw) = &m.raw_output {
                d.insert("rawOutput".into(), raw.clone());
            }
            write_common(&mut d, &m.request_id, &m.metadata);
            "tool.execution_complete"
        }
        NormalizedOutbound::ToolCallUpdate(m) => {
            d.insert("toolCallId".into(), json!(m.tool_call_id));
            if let Some(status) = &m.status {
                d.insert("status".into(), json!(status));
            }
            if let Some(title) = &m.title {
                d.insert("title".into(), json!(title));
                d.insert("progressMessage".into(), json!(title));
            }
            if let Some(content) = &m.content {
                d.insert("content".into(), content.clone());
            }
            if let Some(raw) = &m.raw_output {
                d.insert("rawOutput".into(), raw.clone());
            }
            write_common(&mut d, &m.request_id, &m.metadata);
            "tool.execution_progress"
        }
        NormalizedOutbound::PermissionRequest(m) => {
            d.insert("toolCallId".into(), json!(m.tool_call_id));
            if let Some(title) = &m.title {
                d.insert("title".into(), json!(title));
            }
            d.insert("options".into(), serde_json::to_value(&m.options).unwrap_or(Value::Array(vec![])));
            write_common(&mut d, &m.request_id, &m.metadata);
            "permission.requested"
        }
        NormalizedOutbound::Response(m) => {
            if let Some(reason) = &m.stop_reason {
                d.insert("stopReason".into(), json!(reason));
            }
            write_common(&mut d, &m.request_id, &m.metadata);
            "assistant.turn_end"
        }
        NormalizedOutbound::Error(m) => {
            d.insert("errorType".into(), json!("agent"));
            d.insert("message".into(), json!(m.error.message));
            d.insert("code".into(), json!(m.error.code));
            write_common(&mut d, &m.request_id, &m.metadata);
            "session.error"
        }
        NormalizedOutbound::Noop(_) => return None,
    };
    Some(CopilotEvent::new(event_type, Value::Object(d)))
}

/// Decode a session event back into a normalized message. Unknown event
/// types yield `None`.
pub fn decode_event(event: &CopilotEvent, session_id: &str) -> Option<NormalizedOutbound> {
    let empty = Map::new();
    let d = event.data.as_object().unwrap_or(&empty);
    let session_id = session_id.to_string();
    let request_id = str_field(d, "requestId");
    let metadata = metadata_of(d);

    let msg = match event.event_type.as_str() {
        "assistant.message_delta" => NormalizedOutbound::MessageChunk(MessageChunk {
            session_id,
            request_id,
            text: str_field(d, "deltaContent").unwrap_or_default(),
            metadata,
        }),
        "tool.execution_start" => NormalizedOutbound::ToolCall(ToolCall {
            session_id,
            request_id,
            tool_call_id: str_field(d, "toolCallId")?,
            title: str_field(d, "toolName").unwrap_or_default(),
            tool_kind: str_field(d, "toolKind"),
            status: str_field(d, "status"),
            raw_input: d.get("arguments").cloned(),
            metadata,
        }),
        "tool.execution_progress" => NormalizedOutbound::ToolCallUpdate(ToolCallUpdate {
            session_id,
            request_id,
            tool_call_id: str_field(d, "toolCallId")?,
            title: str_field(d, "title"),
            status: str_field(d, "status"),
            content: d.get("content").cloned(),
            raw_output: d.get("rawOutput").cloned(),
            metadata,
        }),
        "tool.execution_complete" => {
            let success = d.get("success").and_then(Value::as_bool).unwrap_or(false);
            NormalizedOutbound::ToolCallUpdate(ToolCallUpdate {
                session_id,
                request_id,
                tool_call_id: str_field(d, "toolCallId")?,
                title: str_field(d, "title"),
                status: Some(if success { "completed" } else { "failed" }.to_string()),
                content: d.get("result").cloned(),
                raw_output: d.get("rawOutput").cloned(),
                metadata,
            })
        }
        "permission.requested" => NormalizedOutbound::PermissionRequest(PermissionRequest {
            session_id,
            request_id,
            tool_call_id: str_field(d, "toolCallId")?,
            title: str_field(d, "title"),
            options: d
                .get("options")
                .and_then(|o| serde_json::from_value(o.clone()).ok())
                .unwrap_or_default(),
            metadata,
        }),
        "assistant.turn_end" => NormalizedOutbound::Response(ResponseMessage {
            session_id,
            request_id,
            stop_reason: str_field(d, "stopReason"),
            metadata,
        }),
        "session.error" => NormalizedOutbound::Error(ErrorMessage {
            session_id,
            request_id,
            error: ErrorBody {
                code: d.get("code").and_then(Value::as_i64).unwrap_or(codes::INTERNAL_ERROR),
                message: str_field(d, "message").unwrap_or_default(),
            },
            metadata,
        }),
        _ => return None,
    };
    Some(msg)
}
