//! Request observability pipeline library

pub mod config;
pub mod correlation;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod outbound;
pub mod pipeline;
pub mod resilience;
pub mod routing;
pub mod services;

pub use config::schema::ServiceConfig;
pub use http::ServiceServer;
pub use lifecycle::Shutdown;
pub use observability::MetricsRegistry;
pub use pipeline::Pipeline;
