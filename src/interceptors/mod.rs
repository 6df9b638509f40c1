//! Cross-cutting interceptors composed by the engine
//!
//! - [`KillSwitch`]: stops all forwarding for a session
//! - [`Redactor`]: scrubs secrets before frames are recorded or reported
//! - [`ApprovalGate`]: single-resolution pending decisions for tool calls

mod approval;
mod kill_switch;
mod redaction;

pub use approval::{ApprovalDecision, ApprovalGate, PendingApproval};
pub use kill_switch::KillSwitch;
pub use redaction::{Redacted, Redactor};
