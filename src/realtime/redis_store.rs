use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use super::presence::{PresenceError, PresenceStore};

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub max_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_size: 16,
        }
    }
}

/// Redis-backed [`PresenceStore`]; TTLs are kept with millisecond precision.
#[derive(Clone)]
pub struct RedisPresence {
    pool: Pool,
}

impl RedisPresence {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn connect(config: &RedisConfig) -> Result<Self, PresenceError> {
        let mut cfg = Config::from_url(config.url.clone());
        cfg.pool = Some(deadpool_redis::PoolConfig::new(config.max_size));
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self::new(pool))
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Escapes glob metacharacters so the prefix matches literally in `KEYS`.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 4);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[async_trait]
impl PresenceStore for RedisPresence {
    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), PresenceError> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.pset_ex(key, "active", millis(ttl)).await?;
        Ok(())
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, PresenceError> {
        let mut conn = self.pool.get().await?;
        // PEXPIRE is a no-op on missing keys, so an expired session stays gone.
        let applied: bool = conn.pexpire(key, millis(ttl) as i64).await?;
        Ok(applied)
    }

    async fn delete(&self, key: &str) -> Result<bool, PresenceError> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, PresenceError> {
        let mut conn = self.pool.get().await?;
        let pttl: i64 = conn.pttl(key).await?;
        // -2: no such key, -1: key without expiry (not ours, but alive).
        Ok(match pttl {
            -2 => None,
            ms if ms < 0 => Some(Duration::ZERO),
            ms => Some(Duration::from_millis(ms as u64)),
        })
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PresenceError> {
        let mut conn = self.pool.get().await?;
        let mut keys: Vec<String> = conn.keys(format!("{}*", glob_escape(prefix))).await?;
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_escaped_for_keys() {
        assert_eq!(glob_escape("node:1:viewer:"), "node:1:viewer:");
        assert_eq!(glob_escape("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[test]
    fn ttl_never_rounds_to_zero() {
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(30)), 30_000);
    }
}
