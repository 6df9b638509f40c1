//! Per-session frame recorder with a live tap
//!
//! Every frame that crosses the adapter boundary is appended to its session's
//! ring and published on a broadcast channel. Publication never waits: with no
//! subscribers the send error is ignored, and a lagging subscriber only loses
//! its own backlog.

use super::ring::{FrameRing, DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// Capacity of the live broadcast channel
const LIVE_CHANNEL_CAPACITY: usize = 1024;

/// One recorded protocol event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: String,
    pub session_id: String,
    /// Milliseconds since UNIX epoch
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub frame_type: String,
    pub payload: serde_json::Value,
    pub redacted: bool,
    /// Recorded for audit but not forwarded (kill-switch)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub blocked: bool,
}

/// Bounded per-session frame history
pub struct Recorder {
    rings: RwLock<HashMap<String, FrameRing<Frame>>>,
    capacity: usize,
    live: broadcast::Sender<Frame>,
}

impl Recorder {
    /// Create a recorder keeping `capacity` frames per session
    pub fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            rings: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            live,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a frame to the session's ring and publish it
    pub async fn record_frame(
        &self,
        session_id: &str,
        frame_type: &str,
        payload: serde_json::Value,
        redacted: bool,
    ) -> Frame {
        self.append(session_id, frame_type, payload, redacted, false)
            .await
    }

    /// Append a frame that the kill-switch stopped from being forwarded
    pub async fn record_blocked(
        &self,
        session_id: &str,
        frame_type: &str,
        payload: serde_json::Value,
        redacted: bool,
    ) -> Frame {
        self.append(session_id, frame_type, payload, redacted, true)
            .await
    }

    async fn append(
        &self,
        session_id: &str,
        frame_type: &str,
        payload: serde_json::Value,
        redacted: bool,
        blocked: bool,
    ) -> Frame {
        let frame = Frame {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            frame_type: frame_type.to_string(),
            payload,
            redacted,
            blocked,
        };

        {
            let mut rings = self.rings.write().await;
            rings
                .entry(session_id.to_string())
                .or_insert_with(|| FrameRing::new(self.capacity))
                .push(frame.clone());
            // Publish under the lock so live order matches ring order
            let _ = self.live.send(frame.clone());
        }

        tracing::trace!(session_id, frame_type, "Recorded frame");
        frame
    }

    /// Recorded frames of a session, oldest first
    pub async fn frames(&self, session_id: &str) -> Vec<Frame> {
        self.rings
            .read()
            .await
            .get(session_id)
            .map(|ring| ring.to_vec())
            .unwrap_or_default()
    }

    /// Number of frames currently held for a session
    pub async fn len(&self, session_id: &str) -> usize {
        self.rings
            .read()
            .await
            .get(session_id)
            .map(|ring| ring.len())
            .unwrap_or(0)
    }

    /// Drop a session's frames
    pub async fn clear(&self, session_id: &str) {
        if let Some(ring) = self.rings.write().await.get_mut(session_id) {
            ring.clear();
        }
    }

    /// Subscribe to frames as they are recorded
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.live.subscribe()
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let recorder = Recorder::new(10);
        recorder
            .record_frame("s1", "assistant.message_delta", json!({"text": "hi"}), false)
            .await;
        recorder
            .record_frame("s2", "tool.execution_start", json!({}), false)
            .await;

        let frames = recorder.frames("s1").await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, "assistant.message_delta");
        assert_eq!(frames[0].session_id, "s1");
        assert!(recorder.frames("unknown").await.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_eviction_fifo() {
        let recorder = Recorder::new(3);
        for n in 0..7 {
            recorder.record_frame("s1", "t", json!(n), false).await;
        }
        let frames = recorder.frames("s1").await;
        let payloads: Vec<_> = frames.iter().map(|f| f.payload.clone()).collect();
        assert_eq!(payloads, vec![json!(4), json!(5), json!(6)]);
    }

    #[tokio::test]
    async fn test_recording_without_subscribers_does_not_fail() {
        let recorder = Recorder::new(2);
        let frame = recorder.record_frame("s1", "t", json!(null), false).await;
        assert!(!frame.blocked);
    }

    #[tokio::test]
    async fn test_live_subscriber_receives_frames() {
        let recorder = Recorder::new(4);
        let mut rx = recorder.subscribe();
        recorder.record_frame("s1", "a", json!(1), true).await;
        recorder.record_blocked("s1", "b", json!(2), false).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.frame_type, "a");
        assert!(first.redacted);
        let second = rx.recv().await.unwrap();
        assert!(second.blocked);
    }

    #[tokio::test]
    async fn test_slow_subscriber_never_blocks_recording() {
        let recorder = Recorder::new(2);
        let _idle = recorder.subscribe();
        for n in 0..(LIVE_CHANNEL_CAPACITY * 2) {
            recorder.record_frame("s1", "t", json!(n), false).await;
        }
        assert_eq!(recorder.len("s1").await, 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let recorder = Recorder::new(4);
        recorder.record_frame("s1", "t", json!(1), false).await;
        recorder.clear("s1").await;
        assert_eq!(recorder.len("s1").await, 0);
    }
}
