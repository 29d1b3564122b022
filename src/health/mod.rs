//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! /health, /health/live, /health/ready  (/health/ping bypasses the registry)
//!     → HealthRegistry::evaluate(tag filter)
//!     → every matching check runs concurrently, each under its own timeout
//!     → worst result wins: Healthy < Degraded < Unhealthy
//!     → HealthReport (200 / 200 + warning / 503)
//! ```
//!
//! # Design Decisions
//! - Results are never cached; each evaluation runs the checks again
//! - A panicking or hanging check is reported, never propagated
//! - The registration lock is released before any check runs

pub mod aggregator;
pub mod checks;

pub use aggregator::{
    CheckOptions, CheckReport, HealthCheck, HealthCheckResult, HealthRegistry, HealthReport,
    HealthStatus, READY_TAG,
};
pub use checks::{PeerProbe, SelfCheck};
