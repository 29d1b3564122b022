//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound (method, path)
//!     → router.rs (ordered route scan)
//!     → matcher.rs (segment-wise pattern match, capture {params})
//!     → Return: operation name + params, or explicit no-match
//! ```
//!
//! # Design Decisions
//! - Tables are built at startup and immutable afterwards
//! - No regex; patterns are literal or `{param}` segments
//! - First declared match wins, so specific routes go before generic ones
//! - Operation names are static strings, which keeps metric labels bounded

pub mod matcher;
pub mod router;

pub use matcher::PathPattern;
pub use router::{Route, RouteMatch, RouteTable};
