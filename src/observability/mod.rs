//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages, peer client, handlers produce:
//!     → logging.rs (structured log events tagged with correlation_id)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON or pretty)
//!     → /metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Correlation id flows through every log record of a request
//! - Metrics are cheap (atomic increments on pre-resolved series)
//! - The registry is passed as a handle, never looked up globally

pub mod logging;
pub mod metrics;

pub use metrics::{LabelPolicy, MetricsError, MetricsRegistry, MetricsSnapshot};
