//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound peer call:
//!     → per-attempt timeout (enforced by the peer client)
//!     → On failure: retries.rs (retryable? attempts left?)
//!     → backoff.rs (jittered exponential delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Inbound handling never retries; only outbound peer calls may
//! - Retries are opt-in (default policy makes a single attempt)
//! - Retries only for idempotent requests (GET, HEAD, etc.)

pub mod backoff;
pub mod retries;

pub use backoff::calculate_backoff;
pub use retries::{is_retryable, RetryPolicy};
