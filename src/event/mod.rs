//! Canonical event records (SPEC_FULL.md §3, Data Model).

pub mod builder;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Track,
    Error,
    WebVitals,
    Custom,
    OutgoingLink,
}

impl EventKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "track" => Some(Self::Track),
            "error" => Some(Self::Error),
            "web_vitals" => Some(Self::WebVitals),
            "custom" => Some(Self::Custom),
            "outgoing_link" => Some(Self::OutgoingLink),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Error => "error",
            Self::WebVitals => "web_vitals",
            Self::Custom => "custom",
            Self::OutgoingLink => "outgoing_link",
        }
    }

    /// Analytics store table name (ClickHouse/fallback buffer destination).
    pub fn destination(&self) -> &'static str {
        match self {
            Self::Track => "events",
            Self::Error => "errors",
            Self::WebVitals => "web_vitals",
            Self::Custom => "custom_events",
            Self::OutgoingLink => "outgoing_links",
        }
    }

    /// Broker topic name (SPEC_FULL.md §6 "Broker interface"). Distinct from
    /// `destination()` -- the topic and table namespaces are fixed independently.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Track => "analytics-events",
            Self::Error => "analytics-errors",
            Self::WebVitals => "analytics-web-vitals",
            Self::Custom => "analytics-custom-events",
            Self::OutgoingLink => "analytics-outgoing-links",
        }
    }

    /// `error` and `web_vitals` events wrap their whole body (common fields
    /// plus kind-specific ones) under a `payload` field (SPEC_FULL.md §6);
    /// `track`/`custom`/`outgoing_link` are flat. Falls back to `raw` itself
    /// if `payload` is missing so a malformed body still gets field-by-field
    /// schema validation instead of silently passing with all-default fields.
    pub fn unwrap_payload<'a>(&self, raw: &'a Value) -> &'a Value {
        match self {
            Self::Error | Self::WebVitals => raw.get("payload").unwrap_or(raw),
            _ => raw,
        }
    }
}

/// Fields every canonical record carries, regardless of kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonFields {
    pub id: String,
    pub client_id: String,
    pub anonymous_id: String,
    pub session_id: String,
    pub event_id: String,
    pub timestamp: i64,
    pub created_at: i64,
    pub anonymized_ip: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub browser_name: String,
    pub browser_version: String,
    pub os_name: String,
    pub os_version: String,
    pub device_type: String,
    pub device_brand: String,
    pub device_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    #[serde(flatten)]
    pub common: CommonFields,
    pub name: String,
    pub url: String,
    pub referrer: String,
    pub title: String,
    pub viewport: String,
    pub locale: String,
    pub ttfb: Option<f64>,
    pub fcp: Option<f64>,
    pub lcp: Option<f64>,
    pub load_time: Option<f64>,
    pub dom_ready_time: Option<f64>,
    pub render_time: Option<f64>,
    pub redirect_time: Option<f64>,
    pub dns_time: Option<f64>,
    pub connection_time: Option<f64>,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_term: String,
    pub utm_content: String,
    pub time_on_page: Option<f64>,
    pub scroll_depth: Option<f64>,
    pub interaction_count: Option<f64>,
    pub properties: String,
    pub page_count: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(flatten)]
    pub common: CommonFields,
    pub message: String,
    pub filename: String,
    pub lineno: Option<f64>,
    pub colno: Option<f64>,
    pub stack: String,
    pub error_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebVitalsRecord {
    #[serde(flatten)]
    pub common: CommonFields,
    pub fcp: Option<f64>,
    pub lcp: Option<f64>,
    pub cls: Option<f64>,
    pub fid: Option<f64>,
    pub inp: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRecord {
    #[serde(flatten)]
    pub common: CommonFields,
    pub name: String,
    pub properties: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingLinkRecord {
    #[serde(flatten)]
    pub common: CommonFields,
    pub href: String,
    pub text: String,
    pub properties: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CanonicalRecord {
    #[serde(rename = "track")]
    Track(TrackRecord),
    #[serde(rename = "error")]
    Error(ErrorRecord),
    #[serde(rename = "web_vitals")]
    WebVitals(WebVitalsRecord),
    #[serde(rename = "custom")]
    Custom(CustomRecord),
    #[serde(rename = "outgoing_link")]
    OutgoingLink(OutgoingLinkRecord),
}

impl CanonicalRecord {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Track(_) => EventKind::Track,
            Self::Error(_) => EventKind::Error,
            Self::WebVitals(_) => EventKind::WebVitals,
            Self::Custom(_) => EventKind::Custom,
            Self::OutgoingLink(_) => EventKind::OutgoingLink,
        }
    }

    pub fn common(&self) -> &CommonFields {
        match self {
            Self::Track(r) => &r.common,
            Self::Error(r) => &r.common,
            Self::WebVitals(r) => &r.common,
            Self::Custom(r) => &r.common,
            Self::OutgoingLink(r) => &r.common,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.common().event_id
    }
}
