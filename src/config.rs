//! Typed configuration, assembled once at startup from the environment.
//!
//! Mirrors the teacher's `Config::from_env` shape (env var -> parse -> fallback
//! default), but fails fast when an operator-supplied value is present and
//! malformed rather than silently falling back.

use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,

    /// Comma-separated broker list. Absence means fallback-only mode.
    pub kafka_brokers: Option<String>,
    pub redis_url: String,
    pub clickhouse_url: String,
    pub geoip_db_path: String,

    pub payload_max: usize,
    pub batch_max: usize,

    pub dedup_ttl: Duration,
    pub dedup_ttl_exit: Duration,

    pub buffer_hard: usize,
    pub buffer_soft: usize,
    pub buffer_interval: Duration,
    pub buffer_max_retries: u32,

    pub producer_semaphore_limit: usize,
    pub producer_reconnect_cooldown: Duration,
    pub producer_publish_timeout: Duration,

    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            kafka_brokers: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            clickhouse_url: "http://127.0.0.1:8123".to_string(),
            geoip_db_path: "./GeoLite2-City.mmdb".to_string(),
            payload_max: 32_768,
            batch_max: 100,
            dedup_ttl: Duration::from_secs(86_400),
            dedup_ttl_exit: Duration::from_secs(172_800),
            buffer_hard: 10_000,
            buffer_soft: 1_000,
            buffer_interval: Duration::from_millis(5_000),
            buffer_max_retries: 3,
            producer_semaphore_limit: 15,
            producer_reconnect_cooldown: Duration::from_millis(60_000),
            producer_publish_timeout: Duration::from_millis(10_000),
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_millis(5_000),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let port = parse_env_or("PORT", defaults.port)?;
        let kafka_brokers = std::env::var("KAFKA_BROKERS").ok().filter(|s| !s.is_empty());
        let redis_url = std::env::var("REDIS_URL").unwrap_or(defaults.redis_url);
        let clickhouse_url = std::env::var("CLICKHOUSE_URL").unwrap_or(defaults.clickhouse_url);
        let geoip_db_path = std::env::var("GEOIP_DB_PATH").unwrap_or(defaults.geoip_db_path);

        let payload_max = parse_env_or("PAYLOAD_MAX", defaults.payload_max)?;
        let batch_max = parse_env_or("BATCH_MAX", defaults.batch_max)?;

        let dedup_ttl = Duration::from_secs(parse_env_or("DEDUP_TTL_SECS", defaults.dedup_ttl.as_secs())?);
        let dedup_ttl_exit = Duration::from_secs(parse_env_or(
            "DEDUP_TTL_EXIT_SECS",
            defaults.dedup_ttl_exit.as_secs(),
        )?);

        let buffer_hard = parse_env_or("BUFFER_HARD", defaults.buffer_hard)?;
        let buffer_soft = parse_env_or("BUFFER_SOFT", defaults.buffer_soft)?;
        let buffer_interval = Duration::from_millis(parse_env_or(
            "BUFFER_INTERVAL_MS",
            defaults.buffer_interval.as_millis() as u64,
        )?);
        let buffer_max_retries = parse_env_or("BUFFER_MAX_RETRIES", defaults.buffer_max_retries)?;

        let producer_semaphore_limit =
            parse_env_or("PRODUCER_SEMAPHORE_LIMIT", defaults.producer_semaphore_limit)?;
        let producer_reconnect_cooldown = Duration::from_millis(parse_env_or(
            "PRODUCER_RECONNECT_COOLDOWN_MS",
            defaults.producer_reconnect_cooldown.as_millis() as u64,
        )?);
        let producer_publish_timeout = Duration::from_millis(parse_env_or(
            "PRODUCER_PUBLISH_TIMEOUT_MS",
            defaults.producer_publish_timeout.as_millis() as u64,
        )?);

        let circuit_breaker_threshold = parse_env_or("CB_THRESHOLD", defaults.circuit_breaker_threshold)?;
        let circuit_breaker_timeout = Duration::from_millis(parse_env_or(
            "CB_TIMEOUT_MS",
            defaults.circuit_breaker_timeout.as_millis() as u64,
        )?);

        if buffer_soft > buffer_hard {
            anyhow::bail!("BUFFER_SOFT ({buffer_soft}) must not exceed BUFFER_HARD ({buffer_hard})");
        }

        Ok(Self {
            port,
            kafka_brokers,
            redis_url,
            clickhouse_url,
            geoip_db_path,
            payload_max,
            batch_max,
            dedup_ttl,
            dedup_ttl_exit,
            buffer_hard,
            buffer_soft,
            buffer_interval,
            buffer_max_retries,
            producer_semaphore_limit,
            producer_reconnect_cooldown,
            producer_publish_timeout,
            circuit_breaker_threshold,
            circuit_breaker_timeout,
        })
    }

    pub fn broker_enabled(&self) -> bool {
        self.kafka_brokers.is_some()
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}"))
            .with_context(|| format!("parsing environment variable {key}")),
        Err(_) => Ok(default),
    }
}
