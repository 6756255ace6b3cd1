//! Per-kind canonical record construction (SPEC_FULL.md §4.E).

use super::{
    CanonicalRecord, CommonFields, CustomRecord, ErrorRecord, EventKind, OutgoingLinkRecord,
    TrackRecord, WebVitalsRecord,
};
use crate::enrich::{GeoInfo, UaInfo};
use crate::validator::{sanitize, PATH, SHORT, STRING, TEXT};
use serde_json::Value;
use uuid::Uuid;

const TEN_MINUTES_MS: f64 = 600_000.0;
const SESSION_ID_MAX_LEN: usize = 64;

/// Everything the builder needs beyond the raw event payload.
pub struct BuildContext<'a> {
    pub client_id: &'a str,
    pub anonymous_id: &'a str,
    pub geo: &'a GeoInfo,
    pub ua: &'a UaInfo,
    pub now_ms: i64,
}

pub fn build(kind: &str, raw: &Value, ctx: &BuildContext) -> Option<CanonicalRecord> {
    let event_kind = EventKind::from_str(kind)?;
    let payload = event_kind.unwrap_payload(raw);
    let common = build_common(payload, ctx);
    match event_kind {
        EventKind::Track => Some(CanonicalRecord::Track(build_track(payload, common))),
        EventKind::Error => Some(CanonicalRecord::Error(build_error(payload, common))),
        EventKind::WebVitals => Some(CanonicalRecord::WebVitals(build_web_vitals(payload, common))),
        EventKind::Custom => Some(CanonicalRecord::Custom(build_custom(payload, common))),
        EventKind::OutgoingLink => Some(CanonicalRecord::OutgoingLink(build_outgoing_link(payload, common))),
    }
}

fn build_common(raw: &Value, ctx: &BuildContext) -> CommonFields {
    CommonFields {
        id: Uuid::new_v4().to_string(),
        client_id: ctx.client_id.to_string(),
        anonymous_id: ctx.anonymous_id.to_string(),
        session_id: session_id(raw),
        event_id: event_id(raw),
        timestamp: timestamp(raw, ctx.now_ms),
        created_at: ctx.now_ms,
        anonymized_ip: ctx.geo.anonymized_ip.clone(),
        country: ctx.geo.country.clone(),
        region: ctx.geo.region.clone(),
        city: ctx.geo.city.clone(),
        browser_name: ctx.ua.browser_name.clone(),
        browser_version: ctx.ua.browser_version.clone(),
        os_name: ctx.ua.os_name.clone(),
        os_version: ctx.ua.os_version.clone(),
        device_type: ctx.ua.device_type.clone(),
        device_brand: ctx.ua.device_brand.clone(),
        device_model: ctx.ua.device_model.clone(),
    }
}

/// Honors the client-supplied timestamp if it parses to a finite number,
/// otherwise falls back to the server clock.
fn timestamp(raw: &Value, now_ms: i64) -> i64 {
    raw.get("timestamp")
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .map(|v| v as i64)
        .unwrap_or(now_ms)
}

/// Unwraps `payload` for the kinds that nest under it, then resolves the
/// event id. Lets `routes.rs` dedup on the same id `build()` would use,
/// without running the rest of construction first.
pub fn event_id_for(kind: &str, raw: &Value) -> String {
    let payload = EventKind::from_str(kind).map(|k| k.unwrap_payload(raw)).unwrap_or(raw);
    event_id(payload)
}

/// Honors the client event_id if non-empty and under the short-string cap,
/// otherwise issues a fresh random id. Exposed so the caller can dedup on the
/// exact id that ends up in the canonical record.
pub fn event_id(raw: &Value) -> String {
    raw.get("event_id")
        .or_else(|| raw.get("eventId"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= SHORT)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Session ids must be alphanumeric plus `-`/`_`, at most `SESSION_ID_MAX_LEN`
/// chars. Anything else is replaced with a fresh random id.
fn session_id(raw: &Value) -> String {
    let candidate = raw
        .get("session_id")
        .or_else(|| raw.get("sessionId"))
        .and_then(Value::as_str)
        .unwrap_or("");

    let valid = !candidate.is_empty()
        && candidate.len() <= SESSION_ID_MAX_LEN
        && candidate.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        candidate.to_string()
    } else {
        Uuid::new_v4().to_string()
    }
}

/// Missing metrics become `None`; present non-finite values become `None`;
/// present finite values are clamped to `[0, 10 minutes]` in milliseconds.
fn metric(raw: &Value, field: &str) -> Option<f64> {
    let value = raw.get(field)?.as_f64()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, TEN_MINUTES_MS))
}

fn string_field(raw: &Value, field: &str, cap: usize) -> String {
    raw.get(field)
        .and_then(Value::as_str)
        .map(|s| sanitize(s, cap))
        .unwrap_or_default()
}

/// `properties` is serialized to a JSON string; non-object input stores `"{}"`.
fn properties(raw: &Value) -> String {
    match raw.get("properties") {
        Some(value @ Value::Object(_)) => value.to_string(),
        _ => "{}".to_string(),
    }
}

fn build_track(raw: &Value, common: CommonFields) -> TrackRecord {
    TrackRecord {
        common,
        name: string_field(raw, "name", SHORT),
        url: string_field(raw, "url", PATH),
        referrer: string_field(raw, "referrer", PATH),
        title: string_field(raw, "title", STRING),
        viewport: string_field(raw, "viewport", SHORT),
        locale: string_field(raw, "locale", SHORT),
        ttfb: metric(raw, "ttfb"),
        fcp: metric(raw, "fcp"),
        lcp: metric(raw, "lcp"),
        load_time: metric(raw, "load_time"),
        dom_ready_time: metric(raw, "dom_ready_time"),
        render_time: metric(raw, "render_time"),
        redirect_time: metric(raw, "redirect_time"),
        dns_time: metric(raw, "dns_time"),
        connection_time: metric(raw, "connection_time"),
        utm_source: string_field(raw, "utm_source", SHORT),
        utm_medium: string_field(raw, "utm_medium", SHORT),
        utm_campaign: string_field(raw, "utm_campaign", SHORT),
        utm_term: string_field(raw, "utm_term", SHORT),
        utm_content: string_field(raw, "utm_content", SHORT),
        time_on_page: metric(raw, "time_on_page"),
        scroll_depth: metric(raw, "scroll_depth"),
        interaction_count: metric(raw, "interaction_count"),
        properties: properties(raw),
        page_count: metric(raw, "page_count"),
    }
}

fn build_error(raw: &Value, common: CommonFields) -> ErrorRecord {
    ErrorRecord {
        common,
        message: string_field(raw, "message", TEXT),
        filename: string_field(raw, "filename", PATH),
        lineno: metric(raw, "lineno"),
        colno: metric(raw, "colno"),
        stack: string_field(raw, "stack", TEXT),
        error_type: string_field(raw, "error_type", SHORT),
    }
}

fn build_web_vitals(raw: &Value, common: CommonFields) -> WebVitalsRecord {
    WebVitalsRecord {
        common,
        fcp: metric(raw, "fcp"),
        lcp: metric(raw, "lcp"),
        cls: metric(raw, "cls"),
        fid: metric(raw, "fid"),
        inp: metric(raw, "inp"),
    }
}

fn build_custom(raw: &Value, common: CommonFields) -> CustomRecord {
    CustomRecord {
        common,
        name: string_field(raw, "name", SHORT),
        properties: properties(raw),
    }
}

fn build_outgoing_link(raw: &Value, common: CommonFields) -> OutgoingLinkRecord {
    OutgoingLinkRecord {
        common,
        href: string_field(raw, "href", PATH),
        text: string_field(raw, "text", STRING),
        properties: properties(raw),
    }
}
