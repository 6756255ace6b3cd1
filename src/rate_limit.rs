//! Tenant-keyed rate-limit oracle used by the Validator (SPEC_FULL.md §4.A).
//!
//! Adapted from the teacher's IP-keyed sliding-window limiter; keyed by tenant
//! `client_id` here since the intake surface has no per-IP fairness requirement
//! but does need to isolate one noisy tenant from another.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 600,
            window: Duration::from_secs(60),
            burst: 100,
        }
    }
}

struct Entry {
    count: u32,
    window_start: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<HashMap<String, Entry>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the request for `key` (tenant client_id) is allowed.
    pub fn allow(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();

        let entry = state.entry(key.to_string()).or_insert_with(|| Entry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        entry.count <= self.config.max_requests + self.config.burst
    }

    /// Drops windows that are long expired. Intended to run on a periodic tick.
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;
        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }
}
