use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis pool setup failed: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),
}

/// Ephemeral key-value store where every key carries a time-to-live.
///
/// Single-key operations are atomic; nothing else is promised. In particular
/// `keys_with_prefix` is a snapshot and any returned key may expire before
/// the caller looks at it again.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Creates or overwrites `key`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), PresenceError>;

    /// Resets the TTL of an existing key. Returns false, without creating
    /// anything, when the key is absent or already expired.
    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, PresenceError>;

    /// Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool, PresenceError>;

    /// Remaining lifetime, `None` when the key does not exist.
    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, PresenceError>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PresenceError>;

    /// Drops expired keys the backend does not expire on its own.
    async fn purge_expired(&self) -> Result<usize, PresenceError> {
        Ok(0)
    }
}

/// In-process presence store. Expired keys are purged lazily on access.
#[derive(Default, Clone)]
pub struct MemoryPresence {
    entries: Arc<DashMap<String, Instant>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired key and returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| *e.value() > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_expiry(&self, key: &str) -> Option<Instant> {
        let now = Instant::now();
        let expires_at = *self.entries.get(key)?;
        if expires_at > now {
            Some(expires_at)
        } else {
            self.entries.remove_if(key, |_, at| *at <= now);
            None
        }
    }
}

#[async_trait]
impl PresenceStore for MemoryPresence {
    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), PresenceError> {
        self.entries.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, PresenceError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut expires_at) if *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, PresenceError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, expires_at)| expires_at > now)
            .unwrap_or(false))
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, PresenceError> {
        Ok(self
            .live_expiry(key)
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now())))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PresenceError> {
        let now = Instant::now();
        let mut keys = Vec::new();
        self.entries.retain(|key, expires_at| {
            if *expires_at <= now {
                return false;
            }
            if key.starts_with(prefix) {
                keys.push(key.clone());
            }
            true
        });
        keys.sort();
        Ok(keys)
    }

    async fn purge_expired(&self) -> Result<usize, PresenceError> {
        Ok(self.evict_expired())
    }
}
