//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding the user service base URL.
pub const USER_SERVICE_URL_ENV: &str = "USER_SERVICE_URL";
/// Environment variable overriding the order service base URL.
pub const ORDER_SERVICE_URL_ENV: &str = "ORDER_SERVICE_URL";
/// Environment variable overriding the external dependency base URL.
pub const EXTERNAL_SERVICE_URL_ENV: &str = "EXTERNAL_SERVICE_URL";
/// Environment variable overriding the log level.
pub const LOG_LEVEL_ENV: &str = "OBS_LOG_LEVEL";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides to, and validate a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ServiceConfig = toml::from_str(&content)?;
    finalize(config)
}

/// Defaults plus environment overrides, validated.
pub fn load_default() -> Result<ServiceConfig, ConfigError> {
    finalize(ServiceConfig::default())
}

fn finalize(mut config: ServiceConfig) -> Result<ServiceConfig, ConfigError> {
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply overrides from a variable lookup.
pub fn apply_env_overrides<F>(config: &mut ServiceConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(USER_SERVICE_URL_ENV) {
        config.peers.user_service_url = url;
    }
    if let Some(url) = lookup(ORDER_SERVICE_URL_ENV) {
        config.peers.order_service_url = url;
    }
    if let Some(url) = lookup(EXTERNAL_SERVICE_URL_ENV) {
        config.peers.external_service_url = url;
    }
    if let Some(level) = lookup(LOG_LEVEL_ENV) {
        config.observability.log_level = level;
    }
}
