//! Correlation identity for inbound requests.
//!
//! # Data Flow
//! ```text
//! Inbound headers
//!     → acquire() (reuse upstream id or generate a fresh one)
//!     → RequestContext (carried through handler, propagator, logs)
//!     → response header + outbound peer calls
//! ```
//!
//! # Design Decisions
//! - Upstream ids are trusted verbatim so two services stitch into one chain
//! - Ids are immutable once acquired; only tags on the context are mutable
//! - The context is passed explicitly, never looked up from task-local state

pub mod context;

pub use context::RequestContext;

use std::fmt;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

/// Header carrying the correlation id on requests, responses and peer calls.
pub const X_CORRELATION_ID: &str = "x-correlation-id";

/// Legacy header accepted on inbound requests only.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Longest inbound id that is trusted as-is.
pub const MAX_INBOUND_LEN: usize = 128;

/// Opaque identifier shared by every request of one logical call chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new UUID v4 based id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept an upstream value if it is usable as a correlation id.
    ///
    /// Returns `None` for empty, oversized or non-visible-ASCII values.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_INBOUND_LEN {
            return None;
        }
        if !trimmed.bytes().all(|b| b.is_ascii_graphic()) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render as a header value.
    pub fn to_header_value(&self) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
        HeaderValue::from_str(&self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an acquired id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    /// Reused from an upstream caller.
    Inbound,
    /// Freshly generated (first hop).
    Generated,
}

impl IdSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdSource::Inbound => "inbound",
            IdSource::Generated => "generated",
        }
    }
}

/// Extract the correlation id from inbound headers or generate a new one.
///
/// `primary` is checked first, then [`X_REQUEST_ID`].
pub fn acquire(headers: &HeaderMap, primary: &HeaderName) -> (CorrelationId, IdSource) {
    let legacy = HeaderName::from_static(X_REQUEST_ID);
    let inbound = [primary, &legacy]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .find_map(CorrelationId::parse);

    match inbound {
        Some(id) => (id, IdSource::Inbound),
        None => (CorrelationId::generate(), IdSource::Generated),
    }
}
