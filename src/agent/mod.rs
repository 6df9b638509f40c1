//! Agent module: ACP agent process management and request correlation
//!
//! ## Architecture
//!
//! ```text
//! engine ──request/notify/respond──► AgentClient ──NDJSON stdin──► ACP agent
//!    ▲                                   │
//!    └──────── AgentEvent (mpsc) ◄── reader task ◄──NDJSON stdout──┘
//! ```

pub mod client;
pub mod launcher;

pub use client::{AgentClient, AgentEvent};
pub use launcher::spawn_agent;
