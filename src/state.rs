//! Shared application state wiring every component together.

use crate::anonymizer::Anonymizer;
use crate::buffer::FallbackBuffer;
use crate::cache::{InMemoryCache, RedisCache, SharedCache};
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::enrich::GeoEnricher;
use crate::producer::Producer;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::store::{AnalyticsStore, ClickHouseStore};
use crate::tenant::TenantRegistry;
use crate::validator::Validator;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tenants: Arc<TenantRegistry>,
    pub validator: Arc<Validator>,
    pub anonymizer: Arc<Anonymizer>,
    pub dedup: Arc<Deduplicator>,
    pub geo: Arc<GeoEnricher>,
    pub producer: Option<Arc<Producer>>,
    pub buffer: Arc<FallbackBuffer>,
    pub store: Arc<dyn AnalyticsStore>,
}

impl AppState {
    pub async fn build(config: Config, tenants: TenantRegistry) -> anyhow::Result<Self> {
        let cache: Arc<dyn SharedCache> = match RedisCache::connect(&config.redis_url).await {
            Ok(redis) => Arc::new(redis),
            Err(err) => {
                warn!(error = %err, "redis unavailable at startup, using in-memory cache fallback");
                Arc::new(InMemoryCache::new())
            }
        };

        let anonymizer = Arc::new(Anonymizer::new(cache.clone()));
        let dedup = Arc::new(Deduplicator::new(cache, config.dedup_ttl, config.dedup_ttl_exit));
        let geo = Arc::new(GeoEnricher::open(&config.geoip_db_path));

        let rate_limiter = RateLimiter::new(RateLimitConfig::default());
        let validator = Arc::new(Validator::new(config.payload_max, config.batch_max, rate_limiter));

        let producer = if let Some(brokers) = &config.kafka_brokers {
            match Producer::new(
                brokers,
                config.producer_semaphore_limit,
                config.producer_publish_timeout,
                config.producer_reconnect_cooldown,
                config.circuit_breaker_threshold,
                config.circuit_breaker_timeout,
            ) {
                Ok(p) => Some(Arc::new(p)),
                Err(err) => {
                    warn!(error = %err, "failed to start kafka producer, running in fallback-only mode");
                    None
                }
            }
        } else {
            warn!("KAFKA_BROKERS not set, running in fallback-only mode");
            None
        };

        let buffer = Arc::new(FallbackBuffer::new(
            config.buffer_hard,
            config.buffer_soft,
            config.buffer_max_retries,
        ));

        let store: Arc<dyn AnalyticsStore> = Arc::new(ClickHouseStore::new(&config.clickhouse_url));

        Ok(Self {
            config: Arc::new(config),
            tenants: Arc::new(tenants),
            validator,
            anonymizer,
            dedup,
            geo,
            producer,
            buffer,
            store,
        })
    }
}
