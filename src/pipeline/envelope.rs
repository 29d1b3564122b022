//! Wire shapes returned for failed requests.
//!
//! Domain failures (validation, not found) get a small structured body the
//! caller can act on. Everything else gets an [`ErrorEnvelope`], which never
//! carries internal detail.

use axum::http::StatusCode;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::handler::{HandlerError, Reply};
use crate::correlation::CorrelationId;

/// Generic failure response: `{ error, correlationId, timestamp }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub error: String,
    pub correlation_id: String,
    pub timestamp: String,
}

impl ErrorEnvelope {
    pub fn new(kind: &str, message: &str, correlation_id: &CorrelationId, at: DateTime<Utc>) -> Self {
        Self {
            error: format!("{kind}: {message}"),
            correlation_id: correlation_id.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Body for well-formed domain failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainErrorBody {
    pub kind: String,
    pub message: String,
}

/// Message safe to show a caller; internal detail stays in the logs.
fn public_message(err: &HandlerError) -> String {
    match err {
        HandlerError::Validation(msg) | HandlerError::NotFound(msg) => msg.clone(),
        HandlerError::DownstreamUnavailable { peer, status: Some(status), .. } => {
            format!("{peer} answered with status {status}")
        }
        HandlerError::DownstreamUnavailable { peer, status: None, .. } => {
            format!("{peer} is unavailable")
        }
        HandlerError::Timeout(_) => "request exceeded its deadline".to_string(),
        HandlerError::Unexpected(_) => "internal server error".to_string(),
    }
}

/// Build the reply sent to the caller for a failure.
pub fn failure_reply(err: &HandlerError, correlation_id: &CorrelationId) -> Reply {
    let kind = err.kind();
    let status = err.status();
    let message = public_message(err);

    let body = if kind.is_domain() {
        serde_json::to_vec(&DomainErrorBody {
            kind: kind.as_str().to_string(),
            message,
        })
    } else {
        serde_json::to_vec(&ErrorEnvelope::new(
            kind.as_str(),
            &message,
            correlation_id,
            Utc::now(),
        ))
    };

    json_reply(
        status,
        body.unwrap_or_else(|_| fallback_body(correlation_id, Utc::now())),
    )
}

/// Envelope built without the serializer, for when encoding the real body fails.
fn fallback_body(correlation_id: &CorrelationId, at: DateTime<Utc>) -> Vec<u8> {
    serde_json::json!({
        "error": "unexpected: internal server error",
        "correlationId": correlation_id.as_str(),
        "timestamp": at.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
    .to_string()
    .into_bytes()
}

fn json_reply(status: StatusCode, body: Vec<u8>) -> Reply {
    let mut reply = Reply::new(status, body);
    reply.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );
    reply
}
