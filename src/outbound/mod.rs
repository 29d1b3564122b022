//! Outbound propagator: calls from one service to a peer.
//!
//! # Responsibilities
//! - Inject the caller's correlation id on every outbound request
//! - Enforce a per-attempt timeout
//! - Classify transport failures into a typed [`NetworkError`]
//! - Record a duration/outcome sample per attempt, separate from inbound metrics
//!
//! # Design Decisions
//! - No automatic retries unless a [`RetryPolicy`] with more attempts is configured
//! - Non-2xx answers are errors; the calling handler decides what they mean

pub mod client;

pub use client::{NetworkError, PeerClient, PeerRequest, PeerResponse, PeerSettings};

use crate::resilience::RetryPolicy;
