//! HTTP host adapter.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum)
//!     → /health, /health/live, /health/ready, /health/ping → HealthRegistry
//!     → /metrics → MetricsRegistry::render
//!     → everything else: read body (bounded) → RouteTable → Pipeline → Handler
//! ```
//!
//! # Design Decisions
//! - The pipeline owns all request semantics; axum only moves bytes
//! - Oversized bodies and unknown routes still go through the pipeline, so
//!   they get a correlation id, metrics and logs like any other request
//! - Health and metrics endpoints sit outside the pipeline hot path; a thin
//!   middleware still echoes their correlation id

pub mod middleware;
pub mod server;

pub use server::{ServerError, ServiceServer, METRICS_CONTENT_TYPE};
