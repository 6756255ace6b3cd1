//! Request and payload validation (SPEC_FULL.md §4.A).

use crate::bot_detection::{is_filtered_message, is_known_bot_user_agent};
use crate::error::IngestError;
use crate::rate_limit::RateLimiter;
use crate::tenant::Tenant;
use serde_json::Value;

pub const SHORT: usize = 255;
pub const STRING: usize = 2048;
pub const PATH: usize = 4096;
pub const TEXT: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Ignored(String),
    Error { code: String, message: String, issues: Vec<String> },
}

/// Strips control characters and clamps to `max_len` bytes... measured in
/// chars, not bytes, to avoid splitting multi-byte UTF-8 sequences.
pub fn sanitize(input: &str, max_len: usize) -> String {
    let cleaned: String = input.chars().filter(|c| !c.is_control() || *c == ' ').collect();
    cleaned.chars().take(max_len).collect()
}

pub struct Validator {
    payload_max: usize,
    batch_max: usize,
    rate_limiter: RateLimiter,
}

impl Validator {
    pub fn new(payload_max: usize, batch_max: usize, rate_limiter: RateLimiter) -> Self {
        Self {
            payload_max,
            batch_max,
            rate_limiter,
        }
    }

    /// Whole-request checks: payload size, tenant state, origin, rate limit.
    /// Run once per request (or once per batch), before any per-event work.
    pub fn check_request(
        &self,
        body_len: usize,
        tenant: &Tenant,
        origin: Option<&str>,
    ) -> Result<(), IngestError> {
        if body_len > self.payload_max {
            return Err(IngestError::PayloadTooLarge);
        }
        if !tenant.active {
            return Err(IngestError::InactiveTenant);
        }
        if !tenant.allows_origin(origin) {
            return Err(IngestError::OriginNotAllowed);
        }
        if !self.rate_limiter.allow(&tenant.client_id) {
            return Err(IngestError::RateLimited);
        }
        Ok(())
    }

    pub fn check_batch_shape(&self, value: &Value) -> Result<Vec<Value>, IngestError> {
        match value {
            Value::Array(items) => {
                if items.len() > self.batch_max {
                    Err(IngestError::BatchTooLarge)
                } else {
                    Ok(items.clone())
                }
            }
            _ => Err(IngestError::NotAnArray),
        }
    }

    /// Per-event checks: bot heuristic, filtered messages, per-kind schema.
    pub fn check_event(&self, event_type: &str, raw: &Value, user_agent: &str) -> Verdict {
        if is_known_bot_user_agent(user_agent) {
            return Verdict::Ignored("bot".to_string());
        }

        // `error`/`web_vitals` bodies nest their fields under `payload`; unwrap
        // before reading anything kind-specific.
        let kind = crate::event::EventKind::from_str(event_type)
            .expect("event_type already validated by the intake surface");
        let payload = kind.unwrap_payload(raw);

        if event_type == "error" {
            if let Some(message) = payload.get("message").and_then(Value::as_str) {
                if is_filtered_message(message) {
                    return Verdict::Ignored("filtered_message".to_string());
                }
            }
        }

        match validate_schema(event_type, payload) {
            Ok(()) => Verdict::Accepted,
            Err(issues) => Verdict::Error {
                code: "schema_invalid".to_string(),
                message: "schema validation failed".to_string(),
                issues,
            },
        }
    }
}

/// Per-kind presence checks. Each kind needs at minimum an `event_id`; `track`,
/// `custom` and `outgoing_link` additionally need a `name`/`href` field to be
/// meaningful downstream.
fn validate_schema(event_type: &str, raw: &Value) -> Result<(), Vec<String>> {
    let mut issues = Vec::new();

    if !raw.is_object() {
        issues.push("payload must be a JSON object".to_string());
        return Err(issues);
    }

    match event_type {
        "track" => {
            if raw.get("name").and_then(Value::as_str).unwrap_or("").is_empty() {
                issues.push("track event requires a non-empty `name`".to_string());
            }
        }
        "error" => {
            if raw.get("message").and_then(Value::as_str).unwrap_or("").is_empty() {
                issues.push("error event requires a non-empty `message`".to_string());
            }
        }
        "web_vitals" => {
            let has_metric = ["fcp", "lcp", "cls", "fid", "inp"]
                .iter()
                .any(|field| raw.get(field).is_some());
            if !has_metric {
                issues.push("web_vitals event requires at least one metric field".to_string());
            }
        }
        "custom" => {
            if raw.get("name").and_then(Value::as_str).unwrap_or("").is_empty() {
                issues.push("custom event requires a non-empty `name`".to_string());
            }
        }
        "outgoing_link" => {
            if raw.get("href").and_then(Value::as_str).unwrap_or("").is_empty() {
                issues.push("outgoing_link event requires a non-empty `href`".to_string());
            }
        }
        other => {
            issues.push(format!("unknown event type: {other}"));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn tenant(active: bool, origins: Vec<&str>) -> Tenant {
        Tenant {
            client_id: "t1".to_string(),
            name: "Test".to_string(),
            active,
            allowed_origins: origins.into_iter().map(String::from).collect(),
        }
    }

    fn validator() -> Validator {
        Validator::new(
            32_768,
            100,
            RateLimiter::new(crate::rate_limit::RateLimitConfig {
                max_requests: 1000,
                window: Duration::from_secs(60),
                burst: 0,
            }),
        )
    }

    #[test]
    fn sanitize_strips_control_chars_and_clamps_length() {
        let dirty = format!("abc\u{0007}def{}", "x".repeat(300));
        let clean = sanitize(&dirty, SHORT);
        assert!(!clean.contains('\u{0007}'));
        assert_eq!(clean.chars().count(), SHORT);
    }

    #[test]
    fn rejects_oversize_payload() {
        let v = validator();
        let t = tenant(true, vec![]);
        let err = v.check_request(40_000, &t, None).unwrap_err();
        assert!(matches!(err, IngestError::PayloadTooLarge));
    }

    #[test]
    fn rejects_inactive_tenant() {
        let v = validator();
        let t = tenant(false, vec![]);
        let err = v.check_request(10, &t, None).unwrap_err();
        assert!(matches!(err, IngestError::InactiveTenant));
    }

    #[test]
    fn rejects_disallowed_origin() {
        let v = validator();
        let t = tenant(true, vec!["https://acme.example"]);
        let err = v.check_request(10, &t, Some("https://evil.example")).unwrap_err();
        assert!(matches!(err, IngestError::OriginNotAllowed));
    }

    #[test]
    fn batch_over_cap_is_rejected() {
        let v = validator();
        let items: Vec<Value> = (0..101).map(|_| json!({})).collect();
        let err = v.check_batch_shape(&Value::Array(items)).unwrap_err();
        assert!(matches!(err, IngestError::BatchTooLarge));
    }

    #[test]
    fn non_array_batch_body_is_rejected() {
        let v = validator();
        let err = v.check_batch_shape(&json!({"not": "an array"})).unwrap_err();
        assert!(matches!(err, IngestError::NotAnArray));
    }

    #[test]
    fn bot_user_agent_is_ignored_not_errored() {
        let v = validator();
        let verdict = v.check_event("track", &json!({"name": "page_view"}), "curl/8.0");
        assert_eq!(verdict, Verdict::Ignored("bot".to_string()));
    }

    #[test]
    fn filtered_error_message_is_ignored() {
        let v = validator();
        let verdict = v.check_event(
            "error",
            &json!({"message": "Script error."}),
            "Mozilla/5.0",
        );
        assert_eq!(verdict, Verdict::Ignored("filtered_message".to_string()));
    }

    #[test]
    fn well_formed_track_event_is_accepted() {
        let v = validator();
        let verdict = v.check_event("track", &json!({"name": "page_view"}), "Mozilla/5.0");
        assert_eq!(verdict, Verdict::Accepted);
    }

    #[test]
    fn missing_required_field_yields_schema_error() {
        let v = validator();
        let verdict = v.check_event("track", &json!({}), "Mozilla/5.0");
        match verdict {
            Verdict::Error { code, issues, .. } => {
                assert_eq!(code, "schema_invalid");
                assert!(!issues.is_empty());
            }
            _ => panic!("expected schema error"),
        }
    }
}
