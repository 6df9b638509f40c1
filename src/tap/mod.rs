//! Frame tap: bounded per-session history plus a live subscriber channel

mod recorder;
mod ring;

pub use recorder::{Frame, Recorder};
pub use ring::{FrameRing, DEFAULT_CAPACITY};
