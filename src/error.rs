//! Error taxonomy for the ingestion pipeline.
//!
//! Every variant maps to one of the `status` values the intake surface is allowed to
//! return (`success` | `ignored` | `error`). Infrastructure-origin failures
//! (`BrokerUnavailable`, `BufferOverflow`) never reach a response body -- they are
//! absorbed by the producer/buffer and only ever observed via `/health`.

use axum::{response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("payload too large")]
    PayloadTooLarge,

    #[error("batch too large")]
    BatchTooLarge,

    #[error("request body must be a JSON array")]
    NotAnArray,

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("unknown client_id")]
    UnknownTenant,

    #[error("tenant is inactive")]
    InactiveTenant,

    #[error("origin not allowed for this tenant")]
    OriginNotAllowed,

    #[error("client_id query parameter is required")]
    MissingClientId,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("schema validation failed: {0:?}")]
    SchemaInvalid(Vec<String>),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IngestError {
    /// Stable machine-readable code, independent of the Display message.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::PayloadTooLarge
            | IngestError::BatchTooLarge
            | IngestError::NotAnArray
            | IngestError::UnknownEventType(_) => "invalid_request",
            IngestError::UnknownTenant | IngestError::InactiveTenant | IngestError::MissingClientId => {
                "auth_failed"
            }
            IngestError::OriginNotAllowed => "auth_failed",
            IngestError::RateLimited => "rate_limited",
            IngestError::SchemaInvalid(_) => "schema_invalid",
            IngestError::Internal(_) => "internal_error",
        }
    }
}

/// Whole-request failures (bad batch shape, unknown tenant, oversize body) are the
/// only place an `IngestError` is turned directly into an HTTP response; per-event
/// failures inside a batch are captured as result entries instead (see `routes.rs`).
impl IntoResponse for IngestError {
    fn into_response(self) -> axum::response::Response {
        let message = match &self {
            IngestError::Internal(err) => {
                tracing::error!(error = %err, "internal error handling request");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        Json(json!({
            "status": "error",
            "code": self.code(),
            "message": message,
        }))
        .into_response()
    }
}
