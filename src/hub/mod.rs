//! Hub control-plane link
//!
//! Reports session lifecycle and recorded frames to an external hub. Every
//! report is best-effort: a slow, failing or absent hub never affects the
//! protocol path. Reports go through a bounded queue that drops on overflow.

mod link;
mod reporter;

pub use link::{HttpHubLink, HubLink};
pub use reporter::{HubReport, HubReporter};

use serde::{Deserialize, Serialize};

/// Command accepted from the hub (or the local control routes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HubCommand {
    /// Engage the kill-switch for a session
    Kill {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Release the kill-switch for a session
    ClearKill {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Approve a pending tool call
    Approve {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(default, rename = "optionId", skip_serializing_if = "Option::is_none")]
        option_id: Option<String>,
    },
    /// Deny a pending tool call
    Deny {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(default, rename = "optionId", skip_serializing_if = "Option::is_none")]
        option_id: Option<String>,
    },
}

impl HubCommand {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Kill { session_id }
            | Self::ClearKill { session_id }
            | Self::Approve { session_id, .. }
            | Self::Deny { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_shape() {
        let cmd: HubCommand = serde_json::from_value(json!({
            "command": "approve",
            "sessionId": "s1",
            "toolCallId": "tc1"
        }))
        .unwrap();
        assert_eq!(
            cmd,
            HubCommand::Approve {
                session_id: "s1".into(),
                tool_call_id: "tc1".into(),
                option_id: None
            }
        );
        assert_eq!(cmd.session_id(), "s1");

        let kill = serde_json::to_value(HubCommand::ClearKill {
            session_id: "s2".into(),
        })
        .unwrap();
        assert_eq!(kill, json!({"command": "clear_kill", "sessionId": "s2"}));
    }
}
