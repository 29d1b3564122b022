//! Per-request execution context.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use axum::http::Method;
use chrono::{DateTime, Utc};

use super::{CorrelationId, IdSource};

/// State owned by a single request while it moves through the pipeline.
///
/// Never shared between requests. Handlers may add diagnostic tags; the
/// correlation id itself is fixed once the correlation stage has run.
#[derive(Debug)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    id_source: IdSource,
    operation: String,
    method: Method,
    path: String,
    started: Instant,
    started_at: DateTime<Utc>,
    tags: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new(
        correlation_id: CorrelationId,
        operation: impl Into<String>,
        method: Method,
        path: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            id_source: IdSource::Generated,
            operation: operation.into(),
            method,
            path: path.into(),
            started: Instant::now(),
            started_at: Utc::now(),
            tags: BTreeMap::new(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn id_source(&self) -> IdSource {
        self.id_source
    }

    pub(crate) fn assign_correlation(&mut self, id: CorrelationId, source: IdSource) {
        self.correlation_id = id;
        self.id_source = source;
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Attach a diagnostic tag such as `order.id`.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl ToString) {
        self.tags.insert(key.into(), value.to_string());
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }
}
