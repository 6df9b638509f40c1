//! Message translation between client dialects, the normalized model and ACP
//!
//! Everything here is a pure function over `serde_json::Value`. Partial input
//! degrades to `noop` / `None`; only a structurally broken envelope is an error.

pub mod acp;
pub mod copilot;
mod normalized;

pub use normalized::{
    CancelMessage, Decision, ErrorBody, ErrorMessage, MessageChunk, MessageMetadata, NoopMessage,
    NormalizedInbound, NormalizedOutbound, PermissionDecisionMessage, PermissionOption,
    PermissionRequest, PromptMessage, ResponseMessage, TokenUsageMessage, ToolCall, ToolCallUpdate,
    ToolUseMessage, TranslationError, Usage,
};
