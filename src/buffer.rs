//! Fallback buffer: bounded in-memory queue used when the broker is
//! unavailable (SPEC_FULL.md §4.G).

use crate::event::CanonicalRecord;
use crate::store::AnalyticsStore;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

struct Item {
    table: &'static str,
    record: CanonicalRecord,
    retries: u32,
}

pub struct FallbackBuffer {
    queue: Mutex<VecDeque<Item>>,
    hard_cap: usize,
    soft_cap: usize,
    max_retries: u32,
    dropped: AtomicU64,
    logged_burst_drop: std::sync::atomic::AtomicBool,
}

impl FallbackBuffer {
    pub fn new(hard_cap: usize, soft_cap: usize, max_retries: u32) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            hard_cap,
            soft_cap,
            max_retries,
            dropped: AtomicU64::new(0),
            logged_burst_drop: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Appends `record` for `table`. Drops it (incrementing the counter, logging
    /// once per burst) if the queue is already at the hard cap. Returns `true`
    /// if the soft cap was just reached, signaling the caller to flush soon.
    pub fn enqueue(&self, table: &'static str, record: CanonicalRecord) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() >= self.hard_cap {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            if !self.logged_burst_drop.swap(true, Ordering::Relaxed) {
                warn!(table, hard_cap = self.hard_cap, "fallback buffer at hard cap, dropping events");
            }
            return false;
        }
        self.logged_burst_drop.store(false, Ordering::Relaxed);
        queue.push_back(Item {
            table,
            record,
            retries: 0,
        });
        queue.len() >= self.soft_cap
    }

    /// Atomically swaps the whole queue out, groups by destination table, and
    /// bulk-inserts each group. Failed groups are re-enqueued with `retries+1`;
    /// items at the retry cap are dropped with a log instead.
    pub async fn flush(&self, store: &dyn AnalyticsStore) {
        let drained: Vec<Item> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }

        let mut groups: std::collections::HashMap<&'static str, Vec<Item>> =
            std::collections::HashMap::new();
        for item in drained {
            groups.entry(item.table).or_default().push(item);
        }

        for (table, items) in groups {
            let records: Vec<CanonicalRecord> = items.iter().map(|i| i.record.clone()).collect();
            match store.insert_batch(table, &records).await {
                Ok(()) => {}
                Err(err) => {
                    error!(table, error = %err, count = items.len(), "bulk insert failed, requeuing");
                    self.requeue_failed(items);
                }
            }
        }
    }

    fn requeue_failed(&self, items: Vec<Item>) {
        let mut queue = self.queue.lock();
        for item in items {
            let retries = item.retries + 1;
            if retries >= self.max_retries {
                warn!(table = item.table, retries, "dropping item after exceeding retry cap");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if queue.len() >= self.hard_cap {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            queue.push_back(Item {
                table: item.table,
                record: item.record,
                retries,
            });
        }
    }

    /// Shutdown path: force a final flush and report remaining depth.
    pub async fn drain(&self, store: &dyn AnalyticsStore) {
        self.flush(store).await;
    }
}
