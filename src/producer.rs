//! Publishes canonical records to the broker (SPEC_FULL.md §4.F).
//!
//! Wraps an `rdkafka::FutureProducer`, bounding in-flight publishes with a
//! semaphore the way the teacher's signal enrichment pipeline bounded
//! concurrent scrapes, and gating every attempt through the circuit breaker.

use crate::circuit_breaker::CircuitBreaker;
use crate::event::CanonicalRecord;
use parking_lot::RwLock;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, warn};

pub struct Producer {
    inner: RwLock<Option<FutureProducer>>,
    brokers: String,
    semaphore: Semaphore,
    publish_timeout: Duration,
    reconnect_cooldown: Duration,
    connected: AtomicBool,
    last_reconnect_attempt: RwLock<Instant>,
    circuit_breaker: CircuitBreaker,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl Producer {
    pub fn new(
        brokers: &str,
        semaphore_limit: usize,
        publish_timeout: Duration,
        reconnect_cooldown: Duration,
        circuit_breaker_threshold: u32,
        circuit_breaker_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let producer = Self::build_client(brokers)?;
        Ok(Self {
            inner: RwLock::new(Some(producer)),
            brokers: brokers.to_string(),
            semaphore: Semaphore::new(semaphore_limit),
            publish_timeout,
            reconnect_cooldown,
            connected: AtomicBool::new(true),
            last_reconnect_attempt: RwLock::new(Instant::now()),
            circuit_breaker: CircuitBreaker::new(circuit_breaker_threshold, circuit_breaker_timeout),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    fn build_client(brokers: &str) -> anyhow::Result<FutureProducer> {
        ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("compression.type", "gzip")
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| anyhow::anyhow!("failed to create kafka producer: {e}"))
    }

    /// Attempts to publish `record` to its destination topic, keyed by tenant
    /// for partition affinity. Returns `Err` if the circuit breaker is open
    /// (caller falls back to the buffer) or the broker rejects/times out.
    pub async fn send(&self, record: &CanonicalRecord) -> anyhow::Result<()> {
        let topic = record.kind().topic();
        let key = record.common().client_id.clone();
        let payload = serde_json::to_vec(record)?;
        self.publish_one(topic, &key, &payload).await
    }

    /// Publishes `records` to `topic` as one message set with shared
    /// compression/timeout semantics. Unlike `send`, a single connection/
    /// circuit-breaker check covers the whole batch; per-record publish
    /// failures are reported individually so the caller can re-enqueue just
    /// those records into the Fallback Buffer rather than the whole batch.
    pub async fn send_batch(
        &self,
        topic: &str,
        records: &[CanonicalRecord],
    ) -> Vec<(usize, anyhow::Result<()>)> {
        if !self.circuit_breaker.allow_attempt() {
            return (0..records.len())
                .map(|i| (i, Err(anyhow::anyhow!("circuit breaker open, short-circuiting to fallback"))))
                .collect();
        }

        if self.active_client().is_none() {
            self.maybe_reconnect();
            if self.active_client().is_none() {
                self.circuit_breaker.record_failure();
                self.failed.fetch_add(records.len() as u64, Ordering::Relaxed);
                return (0..records.len())
                    .map(|i| (i, Err(anyhow::anyhow!("producer has no active broker connection"))))
                    .collect();
            }
        }

        let mut results = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let key = record.common().client_id.clone();
            let outcome = match serde_json::to_vec(record) {
                Ok(payload) => self.publish_one(topic, &key, &payload).await,
                Err(err) => Err(anyhow::anyhow!("failed to serialize record: {err}")),
            };
            results.push((i, outcome));
        }
        results
    }

    async fn publish_one(&self, topic: &str, key: &str, payload: &[u8]) -> anyhow::Result<()> {
        if !self.circuit_breaker.allow_attempt() {
            anyhow::bail!("circuit breaker open, short-circuiting to fallback");
        }

        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");

        let producer = match self.active_client() {
            Some(p) => p,
            None => {
                self.maybe_reconnect();
                self.circuit_breaker.record_failure();
                self.failed.fetch_add(1, Ordering::Relaxed);
                anyhow::bail!("producer has no active broker connection");
            }
        };

        let key = key.to_string();
        let payload = payload.to_vec();
        let future_record: FutureRecord<String, Vec<u8>> =
            FutureRecord::to(topic).key(&key).payload(&payload);

        match producer.send(future_record, self.publish_timeout).await {
            Ok(_) => {
                self.circuit_breaker.record_success();
                self.connected.store(true, Ordering::Relaxed);
                self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err((err, _)) => {
                self.circuit_breaker.record_failure();
                self.connected.store(false, Ordering::Relaxed);
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(topic, error = %err, "publish failed");
                self.maybe_reconnect();
                Err(anyhow::anyhow!("kafka publish failed: {err}"))
            }
        }
    }

    fn active_client(&self) -> Option<FutureProducer> {
        self.inner.read().clone()
    }

    /// Rebuilds the client connection, but not more often than once per
    /// `reconnect_cooldown` -- avoids a reconnect storm while the broker is
    /// genuinely down.
    fn maybe_reconnect(&self) {
        let now = Instant::now();
        {
            let last = self.last_reconnect_attempt.read();
            if now.duration_since(*last) < self.reconnect_cooldown {
                return;
            }
        }
        *self.last_reconnect_attempt.write() = now;

        match Self::build_client(&self.brokers) {
            Ok(client) => {
                *self.inner.write() = Some(client);
            }
            Err(err) => {
                error!(error = %err, "producer reconnect failed");
                *self.inner.write() = None;
            }
        }
    }

    pub fn circuit_breaker_state(&self) -> crate::circuit_breaker::State {
        self.circuit_breaker.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_broker_fails_fast_and_counts() {
        let producer = Producer::new(
            "127.0.0.1:9",
            4,
            Duration::from_millis(150),
            Duration::from_secs(60),
            3,
            Duration::from_millis(200),
        )
        .expect("client construction does not dial the broker eagerly");

        let record = crate::event::CanonicalRecord::Custom(crate::event::CustomRecord {
            common: test_common(),
            name: "x".to_string(),
            properties: "{}".to_string(),
        });

        assert!(producer.send(&record).await.is_err());
        assert_eq!(producer.failed_count(), 1);
        assert!(!producer.is_connected());
    }

    fn test_common() -> crate::event::CommonFields {
        crate::event::CommonFields {
            id: "id".into(),
            client_id: "t1".into(),
            anonymous_id: "anon".into(),
            session_id: "sess".into(),
            event_id: "evt".into(),
            timestamp: 1,
            created_at: 1,
            anonymized_ip: String::new(),
            country: String::new(),
            region: String::new(),
            city: String::new(),
            browser_name: String::new(),
            browser_version: String::new(),
            os_name: String::new(),
            os_version: String::new(),
            device_type: String::new(),
            device_brand: String::new(),
            device_model: String::new(),
        }
    }
}
