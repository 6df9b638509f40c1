//! Session kill-switch
//!
//! A session in the set must not have anything forwarded on its behalf, in
//! either direction. Membership only changes through `mark_killed` and
//! `clear_killed`.

use std::collections::HashSet;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct KillSwitch {
    killed: RwLock<HashSet<String>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block a session. Returns `false` if it was already blocked.
    pub async fn mark_killed(&self, session_id: &str) -> bool {
        let inserted = self.killed.write().await.insert(session_id.to_string());
        if inserted {
            tracing::warn!(session_id, "Kill-switch engaged");
        }
        inserted
    }

    pub async fn is_killed(&self, session_id: &str) -> bool {
        self.killed.read().await.contains(session_id)
    }

    /// Unblock a session. Returns `false` if it was not blocked.
    pub async fn clear_killed(&self, session_id: &str) -> bool {
        let removed = self.killed.write().await.remove(session_id);
        if removed {
            tracing::info!(session_id, "Kill-switch cleared");
        }
        removed
    }

    pub async fn killed_sessions(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.killed.read().await.iter().cloned().collect();
        ids.sort();
        ids
    }
}
