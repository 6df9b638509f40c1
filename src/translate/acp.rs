//! ACP wire shapes ↔ normalized messages

use super::normalized::*;
use crate::error::codes;
use crate::interceptors::ApprovalDecision;
use serde_json::{json, Map, Value};

/// An ACP call derived from an inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct AcpCall {
    pub method: &'static str,
    pub params: Value,
    /// `session/cancel` is a notification, everything else expects a reply
    pub notification: bool,
}

/// Flatten ACP content into text.
///
/// Accepts a scalar string, a single `{text}` block, or an array of blocks
/// whose text parts are concatenated in order. Non-text blocks are skipped.
pub fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(obj)) => obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .map(|b| content_text(Some(b)))
            .collect::<Vec<_>>()
            .concat(),
        _ => String::new(),
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Translate `session/update` params.
///
/// `Ok(None)` means the update kind has no normalized counterpart. Missing
/// `sessionId` or `update.sessionUpdate` is a structural error.
pub fn update_to_outbound(params: &Value) -> Result<Option<NormalizedOutbound>, TranslationError> {
    let session_id = params
        .get("sessionId")
        .and_then(Value::as_str)
        .ok_or(TranslationError::MissingField("sessionId"))?
        .to_string();
    let update = params
        .get("update")
        .and_then(Value::as_object)
        .ok_or(TranslationError::MissingField("update"))?;
    let discriminant = update
        .get("sessionUpdate")
        .and_then(Value::as_str)
        .ok_or(TranslationError::MissingField("update.sessionUpdate"))?;

    let metadata = MessageMetadata::from_wire(update.get("_meta"));

    let outbound = match discriminant {
        "agent_message" | "agent_message_chunk" => NormalizedOutbound::MessageChunk(MessageChunk {
            session_id,
            request_id: None,
            text: content_text(update.get("content")),
            metadata,
        }),
        "agent_thought_chunk" => {
            let mut metadata = metadata;
            metadata.thought = Some(content_text(update.get("content")));
            NormalizedOutbound::MessageChunk(MessageChunk {
                session_id,
                request_id: None,
                text: String::new(),
                metadata,
            })
        }
        "tool_call" => match str_field(update, "toolCallId") {
            Some(tool_call_id) => NormalizedOutbound::ToolCall(ToolCall {
                session_id,
                request_id: None,
                tool_call_id,
                title: str_field(update, "title").unwrap_or_default(),
                tool_kind: str_field(update, "kind"),
                status: str_field(update, "status"),
                raw_input: update.get("rawInput").cloned(),
                metadata,
            }),
            None => NormalizedOutbound::Noop(NoopMessage::because(
                Some(&session_id),
                "tool_call without toolCallId",
            )),
        },
        "tool_call_update" => match str_field(update, "toolCallId") {
            Some(tool_call_id) => NormalizedOutbound::ToolCallUpdate(ToolCallUpdate {
                session_id,
                request_id: None,
                tool_call_id,
                title: str_field(update, "title"),
                status: str_field(update, "status"),
                content: update.get("content").cloned(),
                raw_output: update.get("rawOutput").cloned(),
                metadata,
            }),
            None => NormalizedOutbound::Noop(NoopMessage::because(
                Some(&session_id),
                "tool_call_update without toolCallId",
            )),
        },
        "end_turn" => NormalizedOutbound::Response(ResponseMessage {
            session_id,
            request_id: None,
            stop_reason: str_field(update, "stopReason"),
            metadata,
        }),
        "error" => {
            let nested = update.get("error").and_then(Value::as_object);
            let message = str_field(update, "message")
                .or_else(|| nested.and_then(|e| str_field(e, "message")))
                .unwrap_or_default();
            let code = update
                .get("code")
                .or_else(|| nested.and_then(|e| e.get("code")))
                .and_then(Value::as_i64)
                .unwrap_or(codes::INTERNAL_ERROR);
            NormalizedOutbound::Error(ErrorMessage {
                session_id,
                request_id: None,
                error: ErrorBody { code, message },
                metadata,
            })
        }
        other => {
            tracing::trace!(session_id = %session_id, kind = other, "Dropping session update");
            return Ok(None);
        }
    };
    Ok(Some(outbound))
}

/// Translate `session/request_permission` params
pub fn permission_request_to_outbound(
    params: &Value,
) -> Result<NormalizedOutbound, TranslationError> {
    let session_id = params
        .get("sessionId")
        .and_then(Value::as_str)
        .ok_or(TranslationError::MissingField("sessionId"))?;
    let tool_call = params
        .get("toolCall")
        .and_then(Value::as_object)
        .ok_or(TranslationError::MissingField("toolCall"))?;
    let tool_call_id =
        str_field(tool_call, "toolCallId").ok_or(TranslationError::MissingField("toolCall.toolCallId"))?;

    let options = params
        .get("options")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|o| {
                    let o = o.as_object()?;
                    Some(PermissionOption {
                        option_id: str_field(o, "optionId")?,
                        name: str_field(o, "name").unwrap_or_default(),
                        kind: str_field(o, "kind").unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(NormalizedOutbound::PermissionRequest(PermissionRequest {
        session_id: session_id.to_string(),
        request_id: None,
        tool_call_id,
        title: str_field(tool_call, "title"),
        options,
        metadata: MessageMetadata::from_wire(params.get("_meta")),
    }))
}

fn with_meta(mut update: Map<String, Value>, metadata: &MessageMetadata) -> Map<String, Value> {
    if !metadata.is_empty() {
        let mut meta = Map::new();
        metadata.write_wire(&mut meta);
        update.insert("_meta".into(), Value::Object(meta));
    }
    update
}

fn insert_opt<T: Into<Value> + Clone>(target: &mut Map<String, Value>, key: &str, value: &Option<T>) {
    if let Some(v) = value {
        target.insert(key.to_string(), v.clone().into());
    }
}

/// Render a normalized message as `session/update` params.
///
/// Permission requests and noops have no update form.
pub fn outbound_to_update(msg: &NormalizedOutbound) -> Option<Value> {
    let (session_id, update) = match msg {
        NormalizedOutbound::MessageChunk(m) => {
            let mut u = Map::new();
            u.insert("sessionUpdate".into(), json!("agent_message_chunk"));
            u.insert("content".into(), json!({"type": "text", "text": m.text}));
            (&m.session_id, with_meta(u, &m.metadata))
        }
        NormalizedOutbound::ToolCall(m) => {
            let mut u = Map::new();
            u.insert("sessionUpdate".into(), json!("tool_call"));
            u.insert("toolCallId".into(), json!(m.tool_call_id));
            u.insert("title".into(), json!(m.title));
            insert_opt(&mut u, "kind", &m.tool_kind);
            insert_opt(&mut u, "status", &m.status);
            insert_opt(&mut u, "rawInput", &m.raw_input);
            (&m.session_id, with_meta(u, &m.metadata))
        }
        NormalizedOutbound::ToolCallUpdate(m) => {
            let mut u = Map::new();
            u.insert("sessionUpdate".into(), json!("tool_call_update"));
            u.insert("toolCallId".into(), json!(m.tool_call_id));
            insert_opt(&mut u, "title", &m.title);
            insert_opt(&mut u, "status", &m.status);
            insert_opt(&mut u, "content", &m.content);
            insert_opt(&mut u, "rawOutput", &m.raw_output);
            (&m.session_id, with_meta(u, &m.metadata))
        }
        NormalizedOutbound::Response(m) => {
            let mut u = Map::new();
            u.insert("sessionUpdate".into(), json!("end_turn"));
            insert_opt(&mut u, "stopReason", &m.stop_reason);
            (&m.session_id, with_meta(u, &m.metadata))
        }
        NormalizedOutbound::Error(m) => {
            let mut u = Map::new();
            u.insert("sessionUpdate".into(), json!("error"));
            u.insert("message".into(), json!(m.error.message));
            u.insert("code".into(), json!(m.error.code));
            (&m.session_id, with_meta(u, &m.metadata))
        }
        NormalizedOutbound::PermissionRequest(_) | NormalizedOutbound::Noop(_) => return None,
    };
    Some(json!({"sessionId": session_id, "update": update}))
}

/// Build the ACP call for an inbound message addressed to `agent_session_id`.
///
/// Only prompts and cancels have an ACP request form.
pub fn inbound_to_request(msg: &NormalizedInbound, agent_session_id: &str) -> Option<AcpCall> {
    match msg {
        NormalizedInbound::Prompt(p) => {
            let mut params = Map::new();
            params.insert("sessionId".into(), json!(agent_session_id));
            params.insert("prompt".into(), json!([{"type": "text", "text": p.text}]));
            let params = with_meta(params, &p.metadata);
            Some(AcpCall {
                method: "session/prompt",
                params: Value::Object(params),
                notification: false,
            })
        }
        NormalizedInbound::Cancel(_) => Some(AcpCall {
            method: "session/cancel",
            params: json!({"sessionId": agent_session_id}),
            notification: true,
        }),
        _ => None,
    }
}

/// Result body answering `session/request_permission`.
///
/// An approval without an explicit option picks the first allow option, a
/// denial the first reject option. With no matching option the outcome is
/// `cancelled`.
pub fn permission_outcome(decision: &ApprovalDecision, options: &[PermissionOption]) -> Value {
    let chosen = match decision {
        ApprovalDecision::Approved { option_id } => option_id
            .clone()
            .or_else(|| options.iter().find(|o| !o.is_reject()).map(|o| o.option_id.clone())),
        ApprovalDecision::Denied { option_id } => option_id
            .clone()
            .or_else(|| options.iter().find(|o| o.is_reject()).map(|o| o.option_id.clone())),
        ApprovalDecision::Cancelled => None,
    };
    match chosen {
        Some(option_id) => json!({"outcome": {"outcome": "selected", "optionId": option_id}}),
        None => json!({"outcome": {"outcome": "cancelled"}}),
    }
}

/// Read a client's answer to a relayed permission request
pub fn decision_from_outcome(result: &Value, options: &[PermissionOption]) -> ApprovalDecision {
    let outcome = result.get("outcome").unwrap_or(&Value::Null);
    match outcome.get("outcome").and_then(Value::as_str) {
        Some("selected") => {
            let option_id = outcome.get("optionId").and_then(Value::as_str).map(str::to_string);
            let rejected = option_id
                .as_deref()
                .and_then(|id| options.iter().find(|o| o.option_id == id))
                .map(PermissionOption::is_reject)
                .unwrap_or(false);
            if rejected {
                ApprovalDecision::Denied { option_id }
            } else {
                ApprovalDecision::Approved { option_id }
            }
        }
        _ => ApprovalDecision::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(session_update: Value) -> Value {
        json!({"sessionId": "s1", "update": session_update})
    }

    #[test]
    fn test_agent_message_concatenates_blocks() {
        let out = update_to_outbound(&update(json!({
            "sessionUpdate": "agent_message",
            "content": [{"text": "A"}, {"text": "B"}]
        })))
        .unwrap()
        .unwrap();
        match out {
            NormalizedOutbound::MessageChunk(chunk) => {
                assert_eq!(chunk.text, "AB");
                assert_eq!(chunk.session_id, "s1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_agent_message_scalar_and_object_content() {
        for content in [json!("hello"), json!({"type": "text", "text": "hello"})] {
            let out = update_to_outbound(&update(json!({
                "sessionUpdate": "agent_message_chunk",
                "content": content
            })))
            .unwrap();
            assert!(matches!(out, Some(NormalizedOutbound::MessageChunk(ref c)) if c.text == "hello"));
        }
    }

    #[test]
    fn test_end_turn_is_empty_response() {
        let out = update_to_outbound(&update(json!({"sessionUpdate": "end_turn"})))
            .unwrap()
            .unwrap();
        match out {
            NormalizedOutbound::Response(r) => assert!(r.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_message_verbatim() {
        let out = update_to_outbound(&update(json!({
            "sessionUpdate": "error",
            "message": "Rate limited: try again in 20s"
        })))
        .unwrap()
        .unwrap();
        match out {
            NormalizedOutbound::Error(e) => {
                assert_eq!(e.error.message, "Rate limited: try again in 20s");
                assert_eq!(e.error.code, codes::INTERNAL_ERROR);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_discriminant_dropped() {
        let out = update_to_outbound(&update(json!({"sessionUpdate": "unknown_kind", "x": 1}))).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(
            update_to_outbound(&json!({"update": {"sessionUpdate": "end_turn"}})).unwrap_err(),
            TranslationError::MissingField("sessionId")
        );
        assert_eq!(
            update_to_outbound(&json!({"sessionId": "s1", "update": {}})).unwrap_err(),
            TranslationError::MissingField("update.sessionUpdate")
        );
    }

    #[test]
    fn test_partial_tool_call_is_noop() {
        let out = update_to_outbound(&update(json!({"sessionUpdate": "tool_call", "title": "ls"})))
            .unwrap()
            .unwrap();
        assert_eq!(out.kind(), "noop");
    }

    #[test]
    fn test_thought_chunk() {
        let out = update_to_outbound(&update(json!({
            "sessionUpdate": "agent_thought_chunk",
            "content": {"type": "text", "text": "pondering"}
        })))
        .unwrap()
        .unwrap();
        let meta = out.metadata().unwrap();
        assert_eq!(meta.thought.as_deref(), Some("pondering"));
    }

    #[test]
    fn test_thought_and_usage_roundtrip() {
        let original = NormalizedOutbound::MessageChunk(MessageChunk {
            session_id: "s1".into(),
            request_id: None,
            text: "answer".into(),
            metadata: MessageMetadata {
                thought: Some("because".into()),
                usage: Some(Usage {
                    input_tokens: Some(10),
                    output_tokens: Some(2),
                    total_tokens: Some(12),
                }),
            },
        });
        let wire = outbound_to_update(&original).unwrap();
        assert_eq!(wire["update"]["_meta"]["thought"], "because");
        let back = update_to_outbound(&wire).unwrap().unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_tool_call_roundtrip() {
        let original = NormalizedOutbound::ToolCallUpdate(ToolCallUpdate {
            session_id: "s1".into(),
            request_id: None,
            tool_call_id: "tc1".into(),
            title: None,
            status: Some("completed".into()),
            content: Some(json!([{"type": "content", "content": {"type": "text", "text": "ok"}}])),
            raw_output: None,
            metadata: MessageMetadata::default(),
        });
        let back = update_to_outbound(&outbound_to_update(&original).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_permission_request() {
        let out = permission_request_to_outbound(&json!({
            "sessionId": "s1",
            "toolCall": {"toolCallId": "tc1", "title": "rm -rf build"},
            "options": [
                {"optionId": "allow", "name": "Allow", "kind": "allow_once"},
                {"optionId": "reject", "name": "Reject", "kind": "reject_once"},
                {"name": "malformed"}
            ]
        }))
        .unwrap();
        match out {
            NormalizedOutbound::PermissionRequest(p) => {
                assert_eq!(p.tool_call_id, "tc1");
                assert_eq!(p.options.len(), 2);
                assert_eq!(p.title.as_deref(), Some("rm -rf build"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(permission_request_to_outbound(&json!({"sessionId": "s1", "toolCall": {}})).is_err());
    }

    #[test]
    fn test_inbound_to_request() {
        let prompt = NormalizedInbound::Prompt(PromptMessage {
            session_id: "local".into(),
            request_id: None,
            text: "hi".into(),
            metadata: MessageMetadata {
                thought: Some("t".into()),
                usage: None,
            },
        });
        let call = inbound_to_request(&prompt, "agent-1").unwrap();
        assert_eq!(call.method, "session/prompt");
        assert!(!call.notification);
        assert_eq!(call.params["sessionId"], "agent-1");
        assert_eq!(call.params["prompt"][0]["text"], "hi");
        assert_eq!(call.params["_meta"]["thought"], "t");

        let cancel = NormalizedInbound::Cancel(CancelMessage {
            session_id: "local".into(),
            request_id: None,
            metadata: MessageMetadata::default(),
        });
        let call = inbound_to_request(&cancel, "agent-1").unwrap();
        assert_eq!(call.method, "session/cancel");
        assert!(call.notification);

        assert!(inbound_to_request(&NormalizedInbound::Noop(NoopMessage::default()), "a").is_none());
    }

    fn options() -> Vec<PermissionOption> {
        vec![
            PermissionOption {
                option_id: "allow".into(),
                name: "Allow".into(),
                kind: "allow_once".into(),
            },
            PermissionOption {
                option_id: "reject".into(),
                name: "Reject".into(),
                kind: "reject_once".into(),
            },
        ]
    }

    #[test]
    fn test_permission_outcome() {
        let opts = options();
        assert_eq!(
            permission_outcome(&ApprovalDecision::Approved { option_id: None }, &opts),
            json!({"outcome": {"outcome": "selected", "optionId": "allow"}})
        );
        assert_eq!(
            permission_outcome(&ApprovalDecision::Denied { option_id: None }, &opts),
            json!({"outcome": {"outcome": "selected", "optionId": "reject"}})
        );
        assert_eq!(
            permission_outcome(&ApprovalDecision::Cancelled, &opts),
            json!({"outcome": {"outcome": "cancelled"}})
        );
        assert_eq!(
            permission_outcome(&ApprovalDecision::Denied { option_id: None }, &[]),
            json!({"outcome": {"outcome": "cancelled"}})
        );
    }

    #[test]
    fn test_decision_from_outcome() {
        let opts = options();
        assert_eq!(
            decision_from_outcome(&json!({"outcome": {"outcome": "selected", "optionId": "reject"}}), &opts),
            ApprovalDecision::Denied {
                option_id: Some("reject".into())
            }
        );
        assert!(decision_from_outcome(
            &json!({"outcome": {"outcome": "selected", "optionId": "allow"}}),
            &opts
        )
        .is_approved());
        assert_eq!(
            decision_from_outcome(&json!({"outcome": {"outcome": "cancelled"}}), &opts),
            ApprovalDecision::Cancelled
        );
        assert_eq!(decision_from_outcome(&json!(null), &opts), ApprovalDecision::Cancelled);
    }
}
