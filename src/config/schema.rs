//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::observability::LabelPolicy;

/// Root configuration for a service instance.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Which sample service this process runs.
    pub service: ServiceSettings,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration for inbound requests.
    pub timeouts: TimeoutConfig,

    /// Peer services reached through the outbound propagator.
    pub peers: PeersConfig,

    /// Health aggregator settings.
    pub health: HealthConfig,

    /// Logging and correlation settings.
    pub observability: ObservabilityConfig,

    /// Metric label cardinality bounds.
    pub metrics: LabelPolicy,

    /// Request hardening.
    pub security: SecurityConfig,
}

/// Sample service selection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[default]
    User,
    Order,
}

impl ServiceKind {
    pub fn default_name(&self) -> &'static str {
        match self {
            ServiceKind::User => "user-service",
            ServiceKind::Order => "order-service",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceSettings {
    pub kind: ServiceKind,

    /// Name used in logs; defaults to the kind's name.
    pub name: Option<String>,
}

impl ServiceSettings {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.default_name().to_string())
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for inbound handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a single inbound request, in milliseconds.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_ms: 30_000 }
    }
}

/// Peer service addresses and outbound call policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PeersConfig {
    /// Base URL of the user service.
    pub user_service_url: String,

    /// Base URL of the order service.
    pub order_service_url: String,

    /// Base URL of the third-party dependency behind `/api/external-call`.
    pub external_service_url: String,

    /// Path requested on the external service.
    pub external_call_path: String,

    /// Per-attempt outbound timeout in milliseconds.
    pub timeout_ms: u64,

    /// Outbound retry policy.
    pub retries: RetryConfig,
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            user_service_url: "http://user-service".to_string(),
            order_service_url: "http://order-service".to_string(),
            external_service_url: "https://httpbin.org".to_string(),
            external_call_path: "/status/200".to_string(),
            timeout_ms: 5_000,
            retries: RetryConfig::default(),
        }
    }
}

/// Outbound retry configuration. One attempt means no retries.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Health aggregator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Default per-check timeout in milliseconds.
    pub check_timeout_ms: u64,

    /// Register a readiness probe against the peer service.
    pub peer_probe_enabled: bool,

    /// Path probed on the peer.
    pub peer_probe_path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: 2_000,
            peer_probe_enabled: true,
            peer_probe_path: "/health/ping".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Header carrying the correlation id.
    pub correlation_header: String,

    /// Expose the /metrics endpoint.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            correlation_header: crate::correlation::X_CORRELATION_ID.to_string(),
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn correlation_header_name(
        &self,
    ) -> Result<axum::http::HeaderName, axum::http::header::InvalidHeaderName> {
        axum::http::HeaderName::try_from(self.correlation_header.as_str())
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
