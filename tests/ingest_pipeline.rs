//! End-to-end tests against the assembled router, grounded on the teacher's
//! `api/backtest_v2.rs` axum-`oneshot` test harness style.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use databuddy_ingest::anonymizer::Anonymizer;
use databuddy_ingest::buffer::FallbackBuffer;
use databuddy_ingest::cache::InMemoryCache;
use databuddy_ingest::config::Config;
use databuddy_ingest::dedup::Deduplicator;
use databuddy_ingest::enrich::GeoEnricher;
use databuddy_ingest::event::CanonicalRecord;
use databuddy_ingest::producer::Producer;
use databuddy_ingest::rate_limit::{RateLimitConfig, RateLimiter};
use databuddy_ingest::routes::{health, intake_batch, intake_single};
use databuddy_ingest::state::AppState;
use databuddy_ingest::store::AnalyticsStore;
use databuddy_ingest::tenant::{Tenant, TenantRegistry};
use databuddy_ingest::validator::Validator;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Captures everything that would have been bulk-inserted, keyed by table, so
/// assertions can inspect the actual canonical records rather than just counts.
#[derive(Default)]
struct RecordingStore {
    rows: Mutex<HashMap<String, Vec<CanonicalRecord>>>,
}

impl RecordingStore {
    fn rows_in(&self, table: &str) -> Vec<CanonicalRecord> {
        self.rows.lock().get(table).cloned().unwrap_or_default()
    }

    fn total_rows(&self) -> usize {
        self.rows.lock().values().map(Vec::len).sum()
    }
}

#[async_trait::async_trait]
impl AnalyticsStore for RecordingStore {
    async fn insert_batch(&self, table: &str, records: &[CanonicalRecord]) -> anyhow::Result<()> {
        self.rows.lock().entry(table.to_string()).or_default().extend(records.iter().cloned());
        Ok(())
    }
}

struct Harness {
    state: AppState,
    store: Arc<RecordingStore>,
}

fn build_state(buffer_hard: usize, buffer_soft: usize, producer: Option<Arc<Producer>>) -> Harness {
    let config = Config::default();
    let tenants = TenantRegistry::in_memory().unwrap();
    tenants
        .upsert(&Tenant {
            client_id: "T".to_string(),
            name: "Test tenant".to_string(),
            active: true,
            allowed_origins: vec![],
        })
        .unwrap();
    tenants
        .upsert(&Tenant {
            client_id: "inactive".to_string(),
            name: "Disabled tenant".to_string(),
            active: false,
            allowed_origins: vec![],
        })
        .unwrap();

    let cache: Arc<dyn databuddy_ingest::cache::SharedCache> = Arc::new(InMemoryCache::new());
    let anonymizer = Arc::new(Anonymizer::new(cache.clone()));
    let dedup = Arc::new(Deduplicator::new(cache, config.dedup_ttl, config.dedup_ttl_exit));
    let geo = Arc::new(GeoEnricher::without_database());
    let rate_limiter = RateLimiter::new(RateLimitConfig {
        max_requests: 10_000,
        window: Duration::from_secs(60),
        burst: 1_000,
    });
    let validator = Arc::new(Validator::new(config.payload_max, config.batch_max, rate_limiter));
    let buffer = Arc::new(FallbackBuffer::new(buffer_hard, buffer_soft, config.buffer_max_retries));
    let store = Arc::new(RecordingStore::default());

    let state = AppState {
        config: Arc::new(config),
        tenants: Arc::new(tenants),
        validator,
        anonymizer,
        dedup,
        geo,
        producer,
        buffer,
        store: store.clone() as Arc<dyn AnalyticsStore>,
    };

    Harness { state, store }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(intake_single))
        .route("/batch", post(intake_batch))
        .route("/health", get(health))
        .with_state(state)
}

/// A realistic browser UA -- an empty or bot-pattern `User-Agent` is itself
/// treated as bot traffic by the Validator (SPEC_FULL.md §4.A), which would
/// make every request in this file silently `"ignored"` instead of accepted.
const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15";

/// `intake_single`/`intake_batch` extract `ConnectInfo<SocketAddr>`, which is
/// normally supplied by `into_make_service_with_connect_info`. `oneshot`
/// bypasses that, so tests attach it to each request's extensions directly.
fn post_request(uri: &str, body: Value) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("user-agent", BROWSER_UA)
        .body(Body::from(body.to_string()))
        .unwrap();
    req.extensions_mut().insert(axum::extract::ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9999))));
    req
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// --- S1: happy path single track ------------------------------------------

#[tokio::test]
async fn s1_happy_path_single_track_buffers_with_salted_anonymous_id() {
    let harness = build_state(10_000, 1_000, None);
    let app = router(harness.state.clone());

    let body = json!({
        "type": "track", "name": "screen_view",
        "anonymousId": "a", "sessionId": "s",
        "timestamp": 1_700_000_000_000i64, "path": "/x",
    });
    let response = app.oneshot(post_request("/?client_id=T", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let out = body_json(response).await;
    assert_eq!(out["status"], "success");
    assert_eq!(out["type"], "track");

    let expected_anon = harness.state.anonymizer.salt("a", 1_700_000_000_000i64).await;
    harness.state.buffer.flush(harness.store.as_ref()).await;
    let rows = harness.store.rows_in("events");
    assert_eq!(rows.len(), 1);
    match &rows[0] {
        CanonicalRecord::Track(record) => {
            assert_eq!(record.common.client_id, "T");
            assert_eq!(record.common.anonymous_id, expected_anon);
        }
        other => panic!("expected a track record, got {other:?}"),
    }
}

// --- S2: duplicate error ----------------------------------------------------

#[tokio::test]
async fn s2_duplicate_error_within_ttl_yields_one_record_both_responses_success() {
    let harness = build_state(10_000, 1_000, None);
    let app = router(harness.state.clone());

    let body = json!({"type": "error", "payload": {"message": "boom", "eventId": "e1"}});

    let first = app.clone().oneshot(post_request("/?client_id=T", body.clone())).await.unwrap();
    assert_eq!(body_json(first).await["status"], "success");

    let second = app.oneshot(post_request("/?client_id=T", body)).await.unwrap();
    let second_body = body_json(second).await;
    assert_eq!(second_body["status"], "success");
    assert_eq!(second_body["eventId"], "e1");

    harness.state.buffer.flush(harness.store.as_ref()).await;
    assert_eq!(harness.store.rows_in("errors").len(), 1);
}

// --- S3: broker down, buffer drains -----------------------------------------

#[tokio::test]
async fn s3_broker_down_buffer_accumulates_then_drains_to_store() {
    let harness = build_state(10_000, 1_000, None); // no producer configured => fallback-only
    let app = router(harness.state.clone());

    for i in 0..50 {
        let body = json!({"type": "track", "name": "screen_view", "eventId": format!("s3-{i}")});
        let response = app.clone().oneshot(post_request("/?client_id=T", body)).await.unwrap();
        assert_eq!(body_json(response).await["status"], "success");
    }

    assert_eq!(harness.state.buffer.len(), 50);
    assert!(harness.state.producer.is_none());

    harness.state.buffer.flush(harness.store.as_ref()).await;
    assert_eq!(harness.state.buffer.len(), 0);
    assert_eq!(harness.store.total_rows(), 50);
}

// --- S4: circuit breaker trip ------------------------------------------------

#[tokio::test]
async fn s4_circuit_breaker_opens_after_threshold_consecutive_failures() {
    let producer = Arc::new(
        Producer::new(
            "127.0.0.1:9", // unroutable, fails fast
            4,
            Duration::from_millis(100),
            Duration::from_secs(60),
            5,
            Duration::from_secs(5),
        )
        .unwrap(),
    );
    let harness = build_state(10_000, 1_000, Some(producer.clone()));
    let app = router(harness.state.clone());

    for i in 0..10 {
        let body = json!({"type": "track", "name": "screen_view", "eventId": format!("s4-{i}")});
        let response = app.clone().oneshot(post_request("/?client_id=T", body)).await.unwrap();
        assert_eq!(body_json(response).await["status"], "success");
    }

    assert_eq!(
        producer.circuit_breaker_state(),
        databuddy_ingest::circuit_breaker::State::Open
    );
    // everything landed in the fallback buffer rather than being lost
    assert_eq!(harness.state.buffer.len(), 10);
}

// --- S5: buffer overflow drop ------------------------------------------------

#[tokio::test]
async fn s5_buffer_overflow_drops_beyond_hard_cap_but_counts_them() {
    let harness = build_state(100, 80, None);
    let app = router(harness.state.clone());

    for i in 0..200 {
        let body = json!({"type": "track", "name": "screen_view", "eventId": format!("s5-{i}")});
        let response = app.clone().oneshot(post_request("/?client_id=T", body)).await.unwrap();
        // Overflow is never surfaced to the client; every response is still "success".
        assert_eq!(body_json(response).await["status"], "success");
    }

    assert!(harness.state.buffer.len() <= 100);
    assert_eq!(harness.state.buffer.len() as u64 + harness.state.buffer.dropped_count(), 200);
    assert!(harness.state.buffer.dropped_count() >= 100);
}

// --- S6: filtered message ignored -------------------------------------------

#[tokio::test]
async fn s6_filtered_error_message_is_ignored_with_reason() {
    let harness = build_state(10_000, 1_000, None);
    let app = router(harness.state.clone());

    let body = json!({"type": "error", "payload": {"message": "Script error.", "eventId": "e-filtered"}});
    let response = app.oneshot(post_request("/?client_id=T", body)).await.unwrap();
    let out = body_json(response).await;
    assert_eq!(out["status"], "ignored");
    assert_eq!(out["type"], "error");
    assert_eq!(out["reason"], "filtered_message");

    harness.state.buffer.flush(harness.store.as_ref()).await;
    assert_eq!(harness.store.total_rows(), 0);
}

// --- Invariant 9: batch boundary ---------------------------------------------

#[tokio::test]
async fn batch_of_exactly_100_is_accepted_101_is_rejected() {
    let harness = build_state(10_000, 1_000, None);
    let app = router(harness.state.clone());

    let items: Vec<Value> = (0..100)
        .map(|i| json!({"type": "track", "name": "screen_view", "eventId": format!("b-{i}")}))
        .collect();
    let response = app.clone().oneshot(post_request("/batch?client_id=T", Value::Array(items))).await.unwrap();
    let out = body_json(response).await;
    assert_eq!(out["status"], "success");
    assert_eq!(out["processed"], 100);

    let items: Vec<Value> = (0..101)
        .map(|i| json!({"type": "track", "name": "screen_view", "eventId": format!("b2-{i}")}))
        .collect();
    let response = app.oneshot(post_request("/batch?client_id=T", Value::Array(items))).await.unwrap();
    let out = body_json(response).await;
    assert_eq!(out["status"], "error");
    assert_eq!(out["message"], "batch too large");
}

// --- Invariant 10: payload boundary ------------------------------------------

#[tokio::test]
async fn payload_of_exactly_payload_max_is_accepted_one_byte_more_is_rejected() {
    let harness = build_state(10_000, 1_000, None);
    let max = harness.state.config.payload_max;
    let app = router(harness.state.clone());

    // Pad `properties` so the serialized body lands exactly on the cap.
    let pad = |target_len: usize| -> Value {
        let skeleton = json!({"type": "track", "name": "screen_view", "eventId": "pad", "properties": {"p": ""}});
        let base_len = skeleton.to_string().len();
        let filler_len = target_len.saturating_sub(base_len);
        json!({"type": "track", "name": "screen_view", "eventId": "pad", "properties": {"p": "x".repeat(filler_len)}})
    };

    let exact = pad(max);
    assert_eq!(exact.to_string().len(), max);
    let response = app.clone().oneshot(post_request("/?client_id=T", exact)).await.unwrap();
    assert_eq!(body_json(response).await["status"], "success");

    let over = pad(max + 1);
    assert_eq!(over.to_string().len(), max + 1);
    let response = app.oneshot(post_request("/?client_id=T", over)).await.unwrap();
    let out = body_json(response).await;
    assert_eq!(out["status"], "error");
    assert_eq!(out["message"], "payload too large");
}

// --- Tenant / origin / rate checks ------------------------------------------

#[tokio::test]
async fn inactive_tenant_is_rejected_with_auth_failed() {
    let harness = build_state(10_000, 1_000, None);
    let app = router(harness.state);

    let body = json!({"type": "track", "name": "screen_view"});
    let response = app.oneshot(post_request("/?client_id=inactive", body)).await.unwrap();
    let out = body_json(response).await;
    assert_eq!(out["status"], "error");
    assert_eq!(out["code"], "auth_failed");
}

#[tokio::test]
async fn missing_client_id_is_rejected() {
    let harness = build_state(10_000, 1_000, None);
    let app = router(harness.state);

    let body = json!({"type": "track", "name": "screen_view"});
    let response = app.oneshot(post_request("/", body)).await.unwrap();
    let out = body_json(response).await;
    assert_eq!(out["status"], "error");
    assert_eq!(out["code"], "auth_failed");
}

#[tokio::test]
async fn unknown_event_type_is_an_invalid_request() {
    let harness = build_state(10_000, 1_000, None);
    let app = router(harness.state);

    let body = json!({"type": "smoke_signal"});
    let response = app.oneshot(post_request("/?client_id=T", body)).await.unwrap();
    let out = body_json(response).await;
    assert_eq!(out["status"], "error");
    assert_eq!(out["code"], "invalid_request");
}

// --- /health shape -----------------------------------------------------------

#[tokio::test]
async fn health_reports_buffer_depth_and_broker_state() {
    let harness = build_state(10_000, 1_000, None);
    let app = router(harness.state.clone());

    let request = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let out = body_json(response).await;
    assert_eq!(out["status"], "ok");
    assert_eq!(out["kafka"]["enabled"], false);
    assert_eq!(out["producer_stats"]["bufferSize"], 0);
}
