use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::presence::{PresenceError, PresenceStore};

/// Default lifetime of a viewer session without a heartbeat.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30);

/// Snapshot of one live viewer session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewerSession {
    pub viewer_id: String,
    /// Remaining lifetime in whole seconds, rounded up.
    pub ttl: u64,
    #[serde(skip)]
    pub remaining: Duration,
    pub expires_at: DateTime<Utc>,
}

impl ViewerSession {
    fn new(viewer_id: String, remaining: Duration) -> Self {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            viewer_id,
            ttl: ceil_secs(remaining),
            remaining,
            expires_at,
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Viewer sessions keyed by `(node, viewer)` on top of a [`PresenceStore`].
#[derive(Clone)]
pub struct ViewerSessions {
    store: Arc<dyn PresenceStore>,
    ttl: Duration,
}

impl ViewerSessions {
    pub fn new(store: Arc<dyn PresenceStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn prefix(node_id: Uuid) -> String {
        format!("node:{}:viewer:", node_id)
    }

    pub fn key(node_id: Uuid, viewer_id: &str) -> String {
        format!("{}{}", Self::prefix(node_id), viewer_id)
    }

    /// Starts a session or resets an existing one to the full window.
    pub async fn start_or_refresh(&self, node_id: Uuid, viewer_id: &str) -> Result<(), PresenceError> {
        self.store
            .set_with_ttl(&Self::key(node_id, viewer_id), self.ttl)
            .await
    }

    /// Resets a live session's TTL. `None` means the session is unknown or
    /// already expired; it is not recreated.
    pub async fn refresh(
        &self,
        node_id: Uuid,
        viewer_id: &str,
    ) -> Result<Option<ViewerSession>, PresenceError> {
        let key = Self::key(node_id, viewer_id);
        if !self.store.refresh(&key, self.ttl).await? {
            return Ok(None);
        }
        let remaining = self.store.remaining_ttl(&key).await?.unwrap_or(self.ttl);
        Ok(Some(ViewerSession::new(viewer_id.to_string(), remaining)))
    }

    pub async fn end(&self, node_id: Uuid, viewer_id: &str) -> Result<bool, PresenceError> {
        self.store.delete(&Self::key(node_id, viewer_id)).await
    }

    /// Approximate: sessions can lapse right after being counted.
    pub async fn count(&self, node_id: Uuid) -> Result<usize, PresenceError> {
        Ok(self.store.keys_with_prefix(&Self::prefix(node_id)).await?.len())
    }

    pub async fn list(&self, node_id: Uuid) -> Result<Vec<ViewerSession>, PresenceError> {
        let prefix = Self::prefix(node_id);
        let keys = self.store.keys_with_prefix(&prefix).await?;

        let mut sessions = Vec::with_capacity(keys.len());
        for key in keys {
            // Expired between listing and lookup.
            let Some(remaining) = self.store.remaining_ttl(&key).await? else {
                continue;
            };
            let viewer_id = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
            sessions.push(ViewerSession::new(viewer_id, remaining));
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::presence::MemoryPresence;

    fn sessions() -> ViewerSessions {
        ViewerSessions::new(Arc::new(MemoryPresence::new()), DEFAULT_SESSION_TTL)
    }

    #[tokio::test(start_paused = true)]
    async fn session_lapses_after_ttl() {
        let sessions = sessions();
        let node = Uuid::new_v4();
        sessions.start_or_refresh(node, "v1").await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        let listed = sessions.list(node).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].viewer_id, "v1");
        assert_eq!(listed[0].ttl, 20);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(sessions.list(node).await.unwrap()[0].ttl, 5);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(sessions.list(node).await.unwrap().is_empty());
        assert_eq!(sessions.count(node).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_resets_rather_than_extends() {
        let sessions = sessions();
        let node = Uuid::new_v4();
        sessions.start_or_refresh(node, "v1").await.unwrap();
        tokio::time::advance(Duration::from_secs(12)).await;

        let once = sessions.refresh(node, "v1").await.unwrap().unwrap();
        let mut last = once.clone();
        for _ in 0..5 {
            last = sessions.refresh(node, "v1").await.unwrap().unwrap();
        }
        assert_eq!(once.remaining, DEFAULT_SESSION_TTL);
        assert_eq!(last.remaining, once.remaining);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_of_expired_session_is_none() {
        let sessions = sessions();
        let node = Uuid::new_v4();
        assert!(sessions.refresh(node, "never").await.unwrap().is_none());

        sessions.start_or_refresh(node, "v1").await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(sessions.refresh(node, "v1").await.unwrap().is_none());
        assert_eq!(sessions.count(node).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_an_expired_session_works() {
        let sessions = sessions();
        let node = Uuid::new_v4();
        sessions.start_or_refresh(node, "v1").await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        sessions.start_or_refresh(node, "v1").await.unwrap();
        assert_eq!(sessions.count(node).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sessions_are_scoped_per_node() {
        let sessions = sessions();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        sessions.start_or_refresh(a, "v1").await.unwrap();
        sessions.start_or_refresh(a, "v2").await.unwrap();
        sessions.start_or_refresh(b, "v1").await.unwrap();

        assert_eq!(sessions.count(a).await.unwrap(), 2);
        assert!(sessions.end(a, "v1").await.unwrap());
        assert!(!sessions.end(a, "v1").await.unwrap());
        assert_eq!(sessions.count(a).await.unwrap(), 1);
        assert_eq!(sessions.count(b).await.unwrap(), 1);
    }
}
