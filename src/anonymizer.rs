//! Daily-rotating salt and salted-identifier hashing (SPEC_FULL.md §4.B).

use crate::cache::{InMemoryCache, SharedCache};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const SALT_TTL: Duration = Duration::from_secs(86_400);
const DAY_MS: i64 = 86_400_000;

pub struct Anonymizer {
    cache: Arc<dyn SharedCache>,
    /// Fallback used uniformly when `cache` errors, keyed by UTC day so the
    /// ephemeral salt stays stable for the rest of that day within this process.
    ephemeral: Mutex<Option<(i64, String)>>,
    ephemeral_cache: InMemoryCache,
}

impl Anonymizer {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self {
            cache,
            ephemeral: Mutex::new(None),
            ephemeral_cache: InMemoryCache::new(),
        }
    }

    fn current_day(now_ms: i64) -> i64 {
        now_ms.div_euclid(DAY_MS)
    }

    /// Fetches (or, on first call of the UTC day, issues) today's salt.
    pub async fn get_daily_salt(&self, now_ms: i64) -> String {
        let day = Self::current_day(now_ms);
        let key = format!("salt:{day}");

        match self.cache.set_if_absent(&key, &Self::generate_salt(), SALT_TTL).await {
            Ok(salt) => salt,
            Err(err) => {
                warn!(error = %err, "shared cache unavailable, using process-local ephemeral salt");
                self.ephemeral_salt_for_day(day).await
            }
        }
    }

    async fn ephemeral_salt_for_day(&self, day: i64) -> String {
        {
            let guard = self.ephemeral.lock();
            if let Some((cached_day, salt)) = guard.as_ref() {
                if *cached_day == day {
                    return salt.clone();
                }
            }
        }
        let key = format!("ephemeral-salt:{day}");
        let salt = self
            .ephemeral_cache
            .set_if_absent(&key, &Self::generate_salt(), SALT_TTL)
            .await
            .unwrap_or_else(|_| Self::generate_salt());
        *self.ephemeral.lock() = Some((day, salt.clone()));
        salt
    }

    fn generate_salt() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// `SHA-256(raw_id ∥ salt)`, hex-encoded. Deterministic within a UTC day.
    pub async fn salt(&self, raw_id: &str, now_ms: i64) -> String {
        let salt = self.get_daily_salt(now_ms).await;
        Self::hash_with_salt(raw_id, &salt)
    }

    fn hash_with_salt(raw_id: &str, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw_id.as_bytes());
        hasher.update(salt.as_bytes());
        hex::encode(hasher.finalize())
    }
}
