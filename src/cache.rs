//! Shared short-TTL cache used by the Anonymizer (daily salt) and the
//! Deduplicator (dedup presence keys).
//!
//! Backed by Redis in production (`RedisCache`); falls back to a process-local
//! `InMemoryCache` when Redis is unreachable, per the documented open question
//! in `SPEC_FULL.md` §9.2 -- unlike the original source, the fallback here is
//! uniform across every call site, because both `Anonymizer` and `Deduplicator`
//! go through this one trait.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Set `key` to `value` with `ttl`, but only if `key` is absent. Returns the
    /// value now stored under `key` (the one that was set, or the one that won
    /// the race). This is the "set-if-absent" primitive both components need so
    /// racing replicas converge on a single answer.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<String>;

    /// Returns `true` if `key` is present (used by the Deduplicator to report
    /// `duplicate` before attempting to claim the key).
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Attempts to claim `key` for `ttl`. Returns `true` if this call was the
    /// one that created the key (first-seen), `false` if it already existed.
    async fn try_claim(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;
}

/// Redis-backed implementation. `SET key value NX EX ttl` gives atomic
/// set-if-absent in one round trip.
pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<String> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        if set.is_some() {
            Ok(value.to_string())
        } else {
            let existing: Option<String> = conn.get(key).await?;
            Ok(existing.unwrap_or_else(|| value.to_string()))
        }
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        Ok(conn.exists(key).await?)
    }

    async fn try_claim(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.manager.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local fallback. Used automatically when Redis is unreachable at
/// startup, and directly in tests.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune_locked(entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|_, e| e.expires_at > now);
    }
}

#[async_trait]
impl SharedCache for InMemoryCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::prune_locked(&mut entries, now);
        if let Some(existing) = entries.get(key) {
            return Ok(existing.value.clone());
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(value.to_string())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::prune_locked(&mut entries, now);
        Ok(entries.contains_key(key))
    }

    async fn try_claim(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::prune_locked(&mut entries, now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: "1".to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }
}
