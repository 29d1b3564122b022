//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check that peer URLs and the correlation header are well-formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderName;
use thiserror::Error;
use url::Url;

use crate::config::schema::ServiceConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("invalid {field} URL '{value}'")]
    PeerUrl { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid correlation header name '{0}'")]
    CorrelationHeader(String),
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    for (field, value) in [
        ("peers.user_service_url", &config.peers.user_service_url),
        ("peers.order_service_url", &config.peers.order_service_url),
        ("peers.external_service_url", &config.peers.external_service_url),
    ] {
        let valid = Url::parse(value)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !valid {
            errors.push(ValidationError::PeerUrl {
                field,
                value: value.clone(),
            });
        }
    }

    let positive = [
        ("timeouts.request_ms", config.timeouts.request_ms),
        ("peers.timeout_ms", config.peers.timeout_ms),
        ("peers.retries.max_attempts", u64::from(config.peers.retries.max_attempts)),
        ("health.check_timeout_ms", config.health.check_timeout_ms),
        ("metrics.max_value_len", config.metrics.max_value_len as u64),
        ("metrics.max_values_per_label", config.metrics.max_values_per_label as u64),
        ("security.max_body_size", config.security.max_body_size as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if HeaderName::try_from(config.observability.correlation_header.as_str()).is_err() {
        errors.push(ValidationError::CorrelationHeader(
            config.observability.correlation_header.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&ServiceConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ServiceConfig::default();
        config.listener.bind_address = "not-an-addr".into();
        config.peers.user_service_url = "ftp://users".into();
        config.timeouts.request_ms = 0;
        config.observability.correlation_header = "bad header".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::Zero("timeouts.request_ms")));
    }

    #[test]
    fn test_external_service_url_must_be_http() {
        let mut config = ServiceConfig::default();
        config.peers.external_service_url = "tcp://dependency".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::PeerUrl {
                field: "peers.external_service_url",
                value: "tcp://dependency".into(),
            }]
        );
    }
}
