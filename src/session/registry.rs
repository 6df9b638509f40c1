//! Session registry and lifecycle state machine
//!
//! ```text
//!            ┌──────────► completed
//!  active ───┤
//!            └──────────► killed
//! ```
//!
//! Both end states are terminal and the first transition wins. The registry
//! also owns the 1:1 mapping between a local session id and the id the agent
//! assigned to it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Killed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

/// Snapshot of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    /// Milliseconds since UNIX epoch
    pub created_at: i64,
    pub updated_at: i64,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SessionRecord {
    fn new(id: &str) -> Self {
        let now = now_millis();
        Self {
            id: id.to_string(),
            created_at: now,
            updated_at: now,
            status: SessionStatus::Active,
            agent_session_id: None,
            title: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Partial update merged by `update_session`
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, SessionRecord>,
    /// agent session id → local session id
    by_agent: HashMap<String, String>,
}

/// Owns every session record; all mutation goes through its methods
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an `active` session if absent. Returns the record and whether it was created.
    pub async fn ensure_session(&self, id: &str) -> (SessionRecord, bool) {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.sessions.get(id) {
            return (existing.clone(), false);
        }
        let record = SessionRecord::new(id);
        inner.sessions.insert(id.to_string(), record.clone());
        tracing::info!(session_id = id, "Created session");
        (record, true)
    }

    pub async fn get(&self, id: &str) -> Option<SessionRecord> {
        self.inner.read().await.sessions.get(id).cloned()
    }

    pub async fn status(&self, id: &str) -> Option<SessionStatus> {
        self.inner.read().await.sessions.get(id).map(|s| s.status)
    }

    /// All sessions, oldest first
    pub async fn list(&self) -> Vec<SessionRecord> {
        let mut sessions: Vec<_> = self.inner.read().await.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    /// Active session ids
    pub async fn active_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Merge partial fields and bump the update timestamp
    pub async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<SessionRecord> {
        let mut inner = self.inner.write().await;
        let record = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::Validation(format!("unknown session '{}'", id)))?;
        if let Some(title) = patch.title {
            record.title = Some(title);
        }
        if let Some(metadata) = patch.metadata {
            record.metadata.extend(metadata);
        }
        touch(record);
        Ok(record.clone())
    }

    /// `active → completed`. Returns whether the transition happened.
    pub async fn complete_session(&self, id: &str) -> bool {
        self.transition(id, SessionStatus::Completed).await
    }

    /// `active → killed`. Unknown ids and sessions already terminal are no-ops.
    pub async fn kill_session(&self, id: &str) -> bool {
        self.transition(id, SessionStatus::Killed).await
    }

    async fn transition(&self, id: &str, to: SessionStatus) -> bool {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.sessions.get_mut(id) else {
            return false;
        };
        if record.status.is_terminal() {
            tracing::debug!(
                session_id = id,
                current = %record.status,
                requested = %to,
                "Ignoring second terminal transition"
            );
            return false;
        }
        record.status = to;
        touch(record);
        tracing::info!(session_id = id, status = %to, "Session transitioned");
        true
    }

    /// Bind the agent-side id for a local session (1:1, idempotent for the same pair)
    pub async fn bind_agent_session(&self, local_id: &str, agent_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(owner) = inner.by_agent.get(agent_id) {
            if owner != local_id {
                return Err(Error::Validation(format!(
                    "agent session '{}' is already mapped to '{}'",
                    agent_id, owner
                )));
            }
        }
        let record = inner
            .sessions
            .get_mut(local_id)
            .ok_or_else(|| Error::Validation(format!("unknown session '{}'", local_id)))?;
        match record.agent_session_id.as_deref() {
            Some(existing) if existing == agent_id => return Ok(()),
            Some(existing) => {
                return Err(Error::Validation(format!(
                    "session '{}' is already mapped to agent session '{}'",
                    local_id, existing
                )))
            }
            None => {}
        }
        record.agent_session_id = Some(agent_id.to_string());
        touch(record);
        inner
            .by_agent
            .insert(agent_id.to_string(), local_id.to_string());
        Ok(())
    }

    pub async fn agent_session_id(&self, local_id: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .sessions
            .get(local_id)
            .and_then(|s| s.agent_session_id.clone())
    }

    pub async fn local_session_id(&self, agent_id: &str) -> Option<String> {
        self.inner.read().await.by_agent.get(agent_id).cloned()
    }

    /// Clear transient fields and the agent mapping, keeping identity and status
    pub async fn reset_runner_session(&self, id: &str) -> Result<SessionRecord> {
        let mut inner = self.inner.write().await;
        let record = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::Validation(format!("unknown session '{}'", id)))?;
        let agent_id = record.agent_session_id.take();
        record.title = None;
        record.metadata.clear();
        touch(record);
        let snapshot = record.clone();
        if let Some(agent_id) = agent_id {
            inner.by_agent.remove(&agent_id);
        }
        Ok(snapshot)
    }
}

fn touch(record: &mut SessionRecord) {
    // Keep updated_at monotonic even when two updates land in the same millisecond
    record.updated_at = now_millis().max(record.updated_at);
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_session_idempotent() {
        let registry = SessionRegistry::new();
        let (first, created) = registry.ensure_session("s1").await;
        assert!(created);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let (second, created) = registry.ensure_session("s1").await;
        assert!(!created);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_and_bumps_timestamp() {
        let registry = SessionRegistry::new();
        let (record, _) = registry.ensure_session("s1").await;

        let mut meta = serde_json::Map::new();
        meta.insert("model".into(), serde_json::json!("gpt"));
        let updated = registry
            .update_session(
                "s1",
                SessionPatch {
                    title: Some("Refactor".into()),
                    metadata: Some(meta),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title.as_deref(), Some("Refactor"));
        assert_eq!(updated.metadata["model"], "gpt");
        assert!(updated.updated_at >= record.updated_at);
        assert_eq!(updated.created_at, record.created_at);

        assert!(registry
            .update_session("missing", SessionPatch::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_first_terminal_transition_wins() {
        let registry = SessionRegistry::new();
        registry.ensure_session("s1").await;
        assert!(registry.complete_session("s1").await);
        assert!(!registry.kill_session("s1").await);
        assert_eq!(registry.status("s1").await, Some(SessionStatus::Completed));

        registry.ensure_session("s2").await;
        assert!(registry.kill_session("s2").await);
        assert!(!registry.complete_session("s2").await);
        assert!(!registry.kill_session("s2").await);
        assert_eq!(registry.status("s2").await, Some(SessionStatus::Killed));
    }

    #[tokio::test]
    async fn test_kill_unknown_is_noop() {
        let registry = SessionRegistry::new();
        assert!(!registry.kill_session("nope").await);
        assert!(registry.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_agent_mapping_is_one_to_one() {
        let registry = SessionRegistry::new();
        registry.ensure_session("local-1").await;
        registry.ensure_session("local-2").await;

        registry.bind_agent_session("local-1", "agent-a").await.unwrap();
        // Same pair again is fine
        registry.bind_agent_session("local-1", "agent-a").await.unwrap();
        assert!(registry.bind_agent_session("local-1", "agent-b").await.is_err());
        assert!(registry.bind_agent_session("local-2", "agent-a").await.is_err());

        assert_eq!(
            registry.agent_session_id("local-1").await.as_deref(),
            Some("agent-a")
        );
        assert_eq!(
            registry.local_session_id("agent-a").await.as_deref(),
            Some("local-1")
        );
    }

    #[tokio::test]
    async fn test_reset_preserves_identity() {
        let registry = SessionRegistry::new();
        let (original, _) = registry.ensure_session("s1").await;
        registry.bind_agent_session("s1", "agent-a").await.unwrap();
        registry
            .update_session(
                "s1",
                SessionPatch {
                    title: Some("t".into()),
                    metadata: None,
                },
            )
            .await
            .unwrap();
        registry.kill_session("s1").await;

        let reset = registry.reset_runner_session("s1").await.unwrap();
        assert_eq!(reset.id, "s1");
        assert_eq!(reset.created_at, original.created_at);
        assert_eq!(reset.status, SessionStatus::Killed);
        assert!(reset.title.is_none());
        assert!(reset.agent_session_id.is_none());
        assert!(registry.local_session_id("agent-a").await.is_none());
    }

    #[tokio::test]
    async fn test_active_ids() {
        let registry = SessionRegistry::new();
        registry.ensure_session("a").await;
        registry.ensure_session("b").await;
        registry.complete_session("b").await;
        assert_eq!(registry.active_ids().await, vec!["a".to_string()]);
    }
}
