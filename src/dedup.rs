//! Event deduplication (SPEC_FULL.md §4.C).

use crate::cache::SharedCache;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const EXIT_PREFIX: &str = "exit_";

pub struct Deduplicator {
    cache: Arc<dyn SharedCache>,
    ttl: Duration,
    ttl_exit: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupResult {
    pub duplicate: bool,
    pub first_seen: bool,
}

impl Deduplicator {
    pub fn new(cache: Arc<dyn SharedCache>, ttl: Duration, ttl_exit: Duration) -> Self {
        Self { cache, ttl, ttl_exit }
    }

    /// Attempts to claim `dedup:{event_type}:{event_id}`. On cache failure, the
    /// request is let through (fails open) -- dedup is advisory by contract.
    pub async fn check(&self, event_type: &str, event_id: &str) -> DedupResult {
        let key = format!("dedup:{event_type}:{event_id}");
        let ttl = if event_id.starts_with(EXIT_PREFIX) {
            self.ttl_exit
        } else {
            self.ttl
        };

        match self.cache.try_claim(&key, ttl).await {
            Ok(true) => DedupResult {
                duplicate: false,
                first_seen: true,
            },
            Ok(false) => DedupResult {
                duplicate: true,
                first_seen: false,
            },
            Err(err) => {
                warn!(error = %err, key = %key, "dedup cache unavailable, admitting event");
                DedupResult {
                    duplicate: false,
                    first_seen: true,
                }
            }
        }
    }
}
