//! Protocol-agnostic message model
//!
//! Both directions are closed sets of kinds. Every variant wraps a struct that
//! rejects unknown fields, so a shape mismatch is an error at the boundary
//! instead of silently dropped data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token accounting attached to a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Lenient read from a wire object. Unknown counters are ignored.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let read = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_u64));
        let usage = Self {
            input_tokens: read(&["inputTokens", "input_tokens"]),
            output_tokens: read(&["outputTokens", "output_tokens"]),
            total_tokens: read(&["totalTokens", "total_tokens"]),
        };
        (!usage.is_empty()).then_some(usage)
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none() && self.output_tokens.is_none() && self.total_tokens.is_none()
    }
}

/// Optional side-channel data carried next to any message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageMetadata {
    /// Model reasoning shown in approval UIs and transcripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// `Some` with no counters is treated as absent
    #[serde(default, skip_serializing_if = "usage_absent")]
    pub usage: Option<Usage>,
}

fn usage_absent(usage: &Option<Usage>) -> bool {
    usage.as_ref().map_or(true, Usage::is_empty)
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.thought.is_none() && usage_absent(&self.usage)
    }

    /// Read `thought` / `usage` from a wire object, tolerating absence
    pub fn from_wire(value: Option<&Value>) -> Self {
        let Some(obj) = value.and_then(Value::as_object) else {
            return Self::default();
        };
        Self {
            thought: obj.get("thought").and_then(Value::as_str).map(str::to_string),
            usage: obj.get("usage").and_then(Usage::from_wire),
        }
    }

    /// Write non-empty fields into a wire object
    pub fn write_wire(&self, target: &mut serde_json::Map<String, Value>) {
        if let Some(thought) = &self.thought {
            target.insert("thought".into(), Value::String(thought.clone()));
        }
        if let Some(usage) = self.usage.as_ref().filter(|u| !u.is_empty()) {
            if let Ok(v) = serde_json::to_value(usage) {
                target.insert("usage".into(), v);
            }
        }
    }
}

// ---- inbound ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CancelMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

/// User decision on a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionDecisionMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub tool_call_id: String,
    pub decision: Decision,
    /// Specific option chosen, when the request offered several
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_id: Option<String>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolUseMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenUsageMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

/// Nothing to do; `reason` says why
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoopMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl NoopMessage {
    pub fn because(session_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            reason: Some(reason.into()),
        }
    }
}

/// Client → agent direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedInbound {
    Prompt(PromptMessage),
    Cancel(CancelMessage),
    PermissionDecision(PermissionDecisionMessage),
    ToolUse(ToolUseMessage),
    TokenUsage(TokenUsageMessage),
    Noop(NoopMessage),
}

impl NormalizedInbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prompt(_) => "prompt",
            Self::Cancel(_) => "cancel",
            Self::PermissionDecision(_) => "permission_decision",
            Self::ToolUse(_) => "tool_use",
            Self::TokenUsage(_) => "token_usage",
            Self::Noop(_) => "noop",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Prompt(m) => Some(&m.session_id),
            Self::Cancel(m) => Some(&m.session_id),
            Self::PermissionDecision(m) => Some(&m.session_id),
            Self::ToolUse(m) => Some(&m.session_id),
            Self::TokenUsage(m) => Some(&m.session_id),
            Self::Noop(m) => m.session_id.as_deref(),
        }
    }

    pub fn metadata(&self) -> Option<&MessageMetadata> {
        match self {
            Self::Prompt(m) => Some(&m.metadata),
            Self::Cancel(m) => Some(&m.metadata),
            Self::PermissionDecision(m) => Some(&m.metadata),
            Self::ToolUse(m) => Some(&m.metadata),
            Self::TokenUsage(m) => Some(&m.metadata),
            Self::Noop(_) => None,
        }
    }
}

// ---- outbound ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageChunk {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCall {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub tool_call_id: String,
    pub title: String,
    /// ACP tool kind such as `read`, `edit`, `execute`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCallUpdate {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

impl ToolCallUpdate {
    /// `completed` or `failed`
    pub fn is_final(&self) -> bool {
        matches!(self.status.as_deref(), Some("completed") | Some("failed"))
    }
}

/// One choice offered by a permission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PermissionOption {
    pub option_id: String,
    #[serde(default)]
    pub name: String,
    /// `allow_once`, `allow_always`, `reject_once`, `reject_always`
    #[serde(default)]
    pub kind: String,
}

impl PermissionOption {
    pub fn is_reject(&self) -> bool {
        self.kind.starts_with("reject")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub options: Vec<PermissionOption>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

/// Completion marker for a turn or call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

impl ResponseMessage {
    /// No stop reason and no metadata
    pub fn is_empty(&self) -> bool {
        self.stop_reason.is_none() && self.metadata.is_empty()
    }
}

/// Structured error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub error: ErrorBody,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
}

/// Agent → client direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedOutbound {
    MessageChunk(MessageChunk),
    ToolCall(ToolCall),
    ToolCallUpdate(ToolCallUpdate),
    PermissionRequest(PermissionRequest),
    Response(ResponseMessage),
    Error(ErrorMessage),
    Noop(NoopMessage),
}

impl NormalizedOutbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageChunk(_) => "message_chunk",
            Self::ToolCall(_) => "tool_call",
            Self::ToolCallUpdate(_) => "tool_call_update",
            Self::PermissionRequest(_) => "permission_request",
            Self::Response(_) => "response",
            Self::Error(_) => "error",
            Self::Noop(_) => "noop",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::MessageChunk(m) => Some(&m.session_id),
            Self::ToolCall(m) => Some(&m.session_id),
            Self::ToolCallUpdate(m) => Some(&m.session_id),
            Self::PermissionRequest(m) => Some(&m.session_id),
            Self::Response(m) => Some(&m.session_id),
            Self::Error(m) => Some(&m.session_id),
            Self::Noop(m) => m.session_id.as_deref(),
        }
    }

    pub fn metadata(&self) -> Option<&MessageMetadata> {
        match self {
            Self::MessageChunk(m) => Some(&m.metadata),
            Self::ToolCall(m) => Some(&m.metadata),
            Self::ToolCallUpdate(m) => Some(&m.metadata),
            Self::PermissionRequest(m) => Some(&m.metadata),
            Self::Response(m) => Some(&m.metadata),
            Self::Error(m) => Some(&m.metadata),
            Self::Noop(_) => None,
        }
    }

    /// Rewrite the session id (agent id → local id)
    pub fn set_session_id(&mut self, session_id: &str) {
        let slot = match self {
            Self::MessageChunk(m) => &mut m.session_id,
            Self::ToolCall(m) => &mut m.session_id,
            Self::ToolCallUpdate(m) => &mut m.session_id,
            Self::PermissionRequest(m) => &mut m.session_id,
            Self::Response(m) => &mut m.session_id,
            Self::Error(m) => &mut m.session_id,
            Self::Noop(m) => {
                m.session_id = Some(session_id.to_string());
                return;
            }
        };
        *slot = session_id.to_string();
    }

    /// Frame type tag used when recording this message
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::MessageChunk(_) => "assistant.message_delta",
            Self::ToolCall(_) => "tool.execution_start",
            Self::ToolCallUpdate(u) if u.is_final() => "tool.execution_complete",
            Self::ToolCallUpdate(_) => "tool.execution_progress",
            Self::PermissionRequest(_) => "permission.requested",
            Self::Response(_) => "assistant.turn_end",
            Self::Error(_) => "session.error",
            Self::Noop(_) => "noop",
        }
    }
}

/// Structural failure while translating
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid shape: {0}")]
    InvalidShape(String),
}

impl From<TranslationError> for crate::error::Error {
    fn from(err: TranslationError) -> Self {
        crate::error::Error::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_tagged_shape() {
        let msg = NormalizedInbound::Prompt(PromptMessage {
            session_id: "s1".into(),
            request_id: None,
            text: "hi".into(),
            metadata: MessageMetadata::default(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"kind": "prompt", "session_id": "s1", "text": "hi"}));

        let back: NormalizedInbound = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = serde_json::from_value::<NormalizedInbound>(json!({
            "kind": "cancel",
            "session_id": "s1",
            "bogus": true
        }));
        assert!(err.is_err());

        let err = serde_json::from_value::<NormalizedOutbound>(json!({
            "kind": "message_chunk",
            "session_id": "s1",
            "text": "x",
            "metadata": {"thought": "t", "mood": "happy"}
        }));
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(serde_json::from_value::<NormalizedOutbound>(json!({"kind": "telepathy"})).is_err());
    }

    #[test]
    fn test_metadata_from_wire() {
        let meta = MessageMetadata::from_wire(Some(&json!({
            "thought": "considering",
            "usage": {"inputTokens": 3, "outputTokens": 4, "cost": 0.1},
            "other": 1
        })));
        assert_eq!(meta.thought.as_deref(), Some("considering"));
        assert_eq!(
            meta.usage,
            Some(Usage {
                input_tokens: Some(3),
                output_tokens: Some(4),
                total_tokens: None
            })
        );
        assert!(MessageMetadata::from_wire(Some(&json!("nope"))).is_empty());
        assert!(MessageMetadata::from_wire(None).is_empty());
    }

    #[test]
    fn test_empty_usage_is_absent() {
        let meta = MessageMetadata {
            thought: Some("t".into()),
            usage: Some(Usage::default()),
        };
        let mut wire = serde_json::Map::new();
        meta.write_wire(&mut wire);
        assert_eq!(Value::Object(wire.clone()), json!({"thought": "t"}));
        assert_eq!(serde_json::to_value(&meta).unwrap(), json!({"thought": "t"}));

        let back = MessageMetadata::from_wire(Some(&Value::Object(wire)));
        assert_eq!(back.thought.as_deref(), Some("t"));
        assert_eq!(back.usage, None);

        let bare = MessageMetadata {
            thought: None,
            usage: Some(Usage::default()),
        };
        assert!(bare.is_empty());
    }

    #[test]
    fn test_set_session_id() {
        let mut msg = NormalizedOutbound::Response(ResponseMessage {
            session_id: "agent-1".into(),
            request_id: None,
            stop_reason: None,
            metadata: MessageMetadata::default(),
        });
        msg.set_session_id("local-1");
        assert_eq!(msg.session_id(), Some("local-1"));
        assert_eq!(msg.frame_type(), "assistant.turn_end");
    }

    #[test]
    fn test_translation_error_is_validation() {
        let err: crate::error::Error = TranslationError::MissingField("sessionId").into();
        assert_eq!(err.rpc_code(), crate::error::codes::INVALID_REQUEST);
    }
}
