//! Session lifecycle and local↔agent id mapping

mod registry;

pub use registry::{SessionPatch, SessionRecord, SessionRegistry, SessionStatus};
