//! Intake surface (SPEC_FULL.md §4.I): `POST /`, `POST /batch`, `GET /health`.
//!
//! Orchestrates Validator -> Anonymizer -> Deduplicator -> Enricher ->
//! EventBuilder -> Producer/FallbackBuffer for every accepted event. Batches
//! validate tenant/origin/rate once, then fan out per-event work in parallel.

use crate::error::IngestError;
use crate::event::builder::{self, BuildContext};
use crate::state::AppState;
use crate::validator::Verdict;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Uri};
use axum::Json;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Pulled out manually (rather than via axum's `Query` extractor) so a
/// malformed query string never produces a non-200 rejection response --
/// the intake surface's contract is `status: error` in the body, never an
/// HTTP-layer failure.
fn client_id_from_uri(uri: &Uri) -> Option<String> {
    uri.query().and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("client_id="))
            .map(|v| v.to_string())
    })
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string())
}

struct EventOutcome {
    value: Value,
}

async fn process_one(state: &AppState, event_type: &str, raw: &Value, ip: &str, ua: &str, client_id: &str) -> EventOutcome {
    match state.validator.check_event(event_type, raw, ua) {
        Verdict::Ignored(reason) => {
            tracing::warn!(client_id, event_type, reason = %reason, "blocked_traffic");
            EventOutcome {
                value: json!({"status": "ignored", "type": event_type, "reason": reason}),
            }
        }
        Verdict::Error { code, message, issues } => {
            tracing::warn!(client_id, event_type, ?issues, "blocked_traffic");
            EventOutcome {
                value: json!({"status": "error", "type": event_type, "code": code, "message": message, "errors": issues}),
            }
        }
        Verdict::Accepted => {
            let event_id = builder::event_id_for(event_type, raw);
            let dedup = state.dedup.check(event_type, &event_id).await;
            if dedup.duplicate {
                // Duplicates are skipped downstream but still reported as accepted --
                // the client never learns its own retries were discarded.
                return EventOutcome {
                    value: json!({"status": "success", "type": event_type, "eventId": event_id}),
                };
            }

            let now = now_ms();
            let payload = crate::event::EventKind::from_str(event_type)
                .map(|k| k.unwrap_payload(raw))
                .unwrap_or(raw);
            let anonymous_id_raw = payload
                .get("anonymous_id")
                .or_else(|| payload.get("anonymousId"))
                .and_then(Value::as_str)
                .unwrap_or(ip);
            let anonymous_id = state.anonymizer.salt(anonymous_id_raw, now).await;
            let geo = state.geo.geo(ip);
            let ua_info = crate::enrich::parse_ua(ua);

            let build_ctx = BuildContext {
                client_id,
                anonymous_id: &anonymous_id,
                geo: &geo,
                ua: &ua_info,
                now_ms: now,
            };

            let Some(record) = builder::build(event_type, raw, &build_ctx) else {
                return EventOutcome {
                    value: json!({"status": "error", "type": event_type, "code": "invalid_request", "message": "unknown event type"}),
                };
            };

            publish_or_buffer(state, record).await;

            EventOutcome {
                value: json!({"status": "success", "type": event_type, "eventId": event_id}),
            }
        }
    }
}

async fn publish_or_buffer(state: &AppState, record: crate::event::CanonicalRecord) {
    let destination = record.kind().destination();
    if let Some(producer) = &state.producer {
        if producer.send(&record).await.is_ok() {
            return;
        }
    }
    if state.buffer.enqueue(destination, record) {
        // Soft cap reached: don't wait for the periodic flush timer.
        let buffer = state.buffer.clone();
        let store = state.store.clone();
        tokio::spawn(async move {
            buffer.flush(store.as_ref()).await;
        });
    }
}

fn event_type_of(raw: &Value) -> Result<String, IngestError> {
    raw.get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|t| crate::event::EventKind::from_str(t).is_some())
        .ok_or_else(|| IngestError::UnknownEventType(
            raw.get("type").and_then(Value::as_str).unwrap_or("").to_string(),
        ))
}

async fn resolve_and_check(
    state: &AppState,
    client_id: Option<&str>,
    origin: Option<&str>,
    body_len: usize,
) -> Result<crate::tenant::Tenant, IngestError> {
    let client_id = client_id.ok_or(IngestError::MissingClientId)?;
    let tenant = state
        .tenants
        .resolve(client_id)
        .map_err(|err| {
            tracing::error!(error = %err, "tenant registry lookup failed");
            IngestError::Internal(err)
        })?
        .ok_or(IngestError::UnknownTenant)?;
    state.validator.check_request(body_len, &tenant, origin)?;
    Ok(tenant)
}

pub async fn intake_single(
    State(state): State<AppState>,
    uri: Uri,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Json<Value> {
    let origin = header_str(&headers, "origin");
    let ua = header_str(&headers, "user-agent").unwrap_or("").to_string();
    let ip = client_ip(&headers, addr);
    let client_id = client_id_from_uri(&uri);

    let tenant = match resolve_and_check(&state, client_id.as_deref(), origin, body.len()).await {
        Ok(t) => t,
        Err(err) => return Json(error_body(&err)),
    };

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return Json(error_body(&IngestError::NotAnArray)),
    };

    let event_type = match event_type_of(&raw) {
        Ok(t) => t,
        Err(err) => return Json(error_body(&err)),
    };

    let outcome = process_one(&state, &event_type, &raw, &ip, &ua, &tenant.client_id).await;
    Json(outcome.value)
}

pub async fn intake_batch(
    State(state): State<AppState>,
    uri: Uri,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Json<Value> {
    let origin = header_str(&headers, "origin");
    let ua = header_str(&headers, "user-agent").unwrap_or("").to_string();
    let ip = client_ip(&headers, addr);
    let client_id = client_id_from_uri(&uri);

    let tenant = match resolve_and_check(&state, client_id.as_deref(), origin, body.len()).await {
        Ok(t) => t,
        Err(err) => return Json(error_body(&err)),
    };

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return Json(error_body(&IngestError::NotAnArray)),
    };

    let items = match state.validator.check_batch_shape(&raw) {
        Ok(items) => items,
        Err(err) => return Json(error_body(&err)),
    };

    let mut join_set = tokio::task::JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let state = state.clone();
        let ip = ip.clone();
        let ua = ua.clone();
        let client_id = tenant.client_id.clone();
        join_set.spawn(async move {
            let value = match event_type_of(&item) {
                Ok(event_type) => process_one(&state, &event_type, &item, &ip, &ua, &client_id).await.value,
                Err(err) => error_body(&err),
            };
            (index, value)
        });
    }

    let mut results: Vec<Value> = vec![Value::Null; join_set.len()];
    while let Some(outcome) = join_set.join_next().await {
        if let Ok((index, value)) = outcome {
            results[index] = value;
        }
    }

    Json(json!({
        "status": "success",
        "batch": true,
        "processed": results.len(),
        "results": results,
    }))
}

fn error_body(err: &IngestError) -> Value {
    json!({"status": "error", "code": err.code(), "message": err.to_string()})
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let kafka = match &state.producer {
        Some(p) => json!({
            "status": "enabled",
            "enabled": true,
            "connected": p.is_connected(),
            "failed": matches!(p.circuit_breaker_state(), crate::circuit_breaker::State::Open),
            "circuitBreaker": format!("{:?}", p.circuit_breaker_state()),
        }),
        None => json!({"status": "disabled", "enabled": false, "connected": false}),
    };

    Json(json!({
        "status": "ok",
        "kafka": kafka,
        "producer_stats": {
            "sent": state.producer.as_ref().map(|p| p.sent_count()).unwrap_or(0),
            "failed": state.producer.as_ref().map(|p| p.failed_count()).unwrap_or(0),
            "bufferSize": state.buffer.len(),
            "dropped": state.buffer.dropped_count(),
        },
    }))
}
