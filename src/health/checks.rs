//! Built-in checks.
//!
//! # Responsibilities
//! - `self`: the process is scheduling tasks
//! - `peer:<name>`: a peer service answers its ping endpoint

use std::time::Duration;

use axum::http::HeaderName;
use futures_util::future::BoxFuture;
use url::Url;

use super::{HealthCheck, HealthCheckResult};
use crate::correlation::CorrelationId;

/// Always healthy while the runtime can poll it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfCheck;

impl HealthCheck for SelfCheck {
    fn check(&self) -> BoxFuture<'_, HealthCheckResult> {
        Box::pin(async { HealthCheckResult::Healthy })
    }
}

/// Probes a peer's health endpoint.
#[derive(Debug, Clone)]
pub struct PeerProbe {
    peer: String,
    url: Url,
    timeout: Duration,
    correlation_header: HeaderName,
    client: reqwest::Client,
}

impl PeerProbe {
    pub fn new(
        peer: impl Into<String>,
        base_url: &Url,
        path: &str,
        timeout: Duration,
        correlation_header: HeaderName,
    ) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent("obs-pipeline-health-check")
            .no_proxy()
            .build()?;

        Ok(Self {
            peer: peer.into(),
            url: base_url.join(path)?,
            timeout,
            correlation_header,
            client,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn probe(&self) -> HealthCheckResult {
        let response = self
            .client
            .get(self.url.clone())
            .timeout(self.timeout)
            .header(&self.correlation_header, CorrelationId::generate().as_str())
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => HealthCheckResult::Healthy,
            Ok(response) => {
                tracing::warn!(peer = %self.peer, status = %response.status(), "Peer probe failed: non-success status");
                HealthCheckResult::degraded(format!("{} answered {}", self.peer, response.status()))
            }
            Err(e) if e.is_timeout() => {
                tracing::warn!(peer = %self.peer, "Peer probe failed: timeout");
                HealthCheckResult::unhealthy("timeout", Some(format!("{} did not answer", self.peer)))
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "Peer probe failed: connection error");
                HealthCheckResult::unhealthy("unreachable", Some(e.to_string()))
            }
        }
    }
}

impl HealthCheck for PeerProbe {
    fn check(&self) -> BoxFuture<'_, HealthCheckResult> {
        Box::pin(self.probe())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid probe url: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to build probe client: {0}")]
    Client(#[from] reqwest::Error),
}
