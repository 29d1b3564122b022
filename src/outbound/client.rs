//! HTTP client for peer services.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use super::RetryPolicy;
use crate::correlation::RequestContext;
use crate::observability::metrics::{
    Counter, Histogram, MetricsRegistry, HTTP_CLIENT_DURATION, HTTP_CLIENT_REQUESTS,
};
use crate::pipeline::HandlerError;
use crate::resilience::is_retryable;

/// Failure of a single peer call.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("{peer} did not answer within {after:?}")]
    Timeout { peer: String, after: Duration },

    #[error("could not connect to {peer}: {message}")]
    Connect { peer: String, message: String },

    #[error("{peer} answered with status {status}")]
    Status {
        peer: String,
        status: StatusCode,
        body: Bytes,
    },

    #[error("transport error talking to {peer}: {message}")]
    Transport { peer: String, message: String },

    #[error("invalid request for {peer}: {message}")]
    InvalidRequest { peer: String, message: String },

    #[error("could not decode response from {peer}: {message}")]
    Decode { peer: String, message: String },
}

impl NetworkError {
    /// Outcome label for the outbound metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            NetworkError::Timeout { .. } => "timeout",
            NetworkError::Connect { .. } => "connection_error",
            NetworkError::Status { status, .. } if status.is_client_error() => "client_error",
            NetworkError::Status { .. } => "server_error",
            NetworkError::Transport { .. }
            | NetworkError::InvalidRequest { .. }
            | NetworkError::Decode { .. } => "transport_error",
        }
    }

    /// The peer's status, if it answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            NetworkError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Timeouts and refused connections.
    pub fn is_transport(&self) -> bool {
        matches!(self, NetworkError::Timeout { .. } | NetworkError::Connect { .. })
    }

    pub fn peer(&self) -> &str {
        match self {
            NetworkError::Timeout { peer, .. }
            | NetworkError::Connect { peer, .. }
            | NetworkError::Status { peer, .. }
            | NetworkError::Transport { peer, .. }
            | NetworkError::InvalidRequest { peer, .. }
            | NetworkError::Decode { peer, .. } => peer,
        }
    }
}

impl From<NetworkError> for HandlerError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::InvalidRequest { .. } | NetworkError::Decode { .. } => {
                HandlerError::unexpected(err)
            }
            other => HandlerError::DownstreamUnavailable {
                peer: other.peer().to_string(),
                status: other.status().map(|s| s.as_u16()),
                reason: other.to_string(),
            },
        }
    }
}

/// A request to a peer, relative to its base URL.
#[derive(Debug, Clone)]
pub struct PeerRequest {
    pub method: Method,
    pub path: String,
    /// Operation label for metrics, distinct from inbound operations.
    pub operation: String,
    pub body: Option<Bytes>,
}

impl PeerRequest {
    pub fn get(operation: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            operation: operation.into(),
            body: None,
        }
    }

    pub fn json<T: Serialize>(
        method: Method,
        operation: impl Into<String>,
        path: impl Into<String>,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            method,
            path: path.into(),
            operation: operation.into(),
            body: Some(Bytes::from(serde_json::to_vec(body)?)),
        })
    }
}

/// Successful (2xx) peer answer.
#[derive(Debug, Clone)]
pub struct PeerResponse {
    pub peer: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl PeerResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, NetworkError> {
        serde_json::from_slice(&self.body).map_err(|e| NetworkError::Decode {
            peer: self.peer.clone(),
            message: e.to_string(),
        })
    }
}

/// Per-peer call settings.
#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub correlation_header: HeaderName,
}

/// Client bound to one peer service.
#[derive(Debug, Clone)]
pub struct PeerClient {
    peer: String,
    base_url: Url,
    client: reqwest::Client,
    settings: PeerSettings,
    requests: Counter,
    duration: Histogram,
}

impl PeerClient {
    pub fn new(
        peer: impl Into<String>,
        base_url: Url,
        settings: PeerSettings,
        metrics: &MetricsRegistry,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .no_proxy()
            .build()?;

        Ok(Self {
            peer: peer.into(),
            base_url,
            client,
            settings,
            requests: metrics
                .counter(HTTP_CLIENT_REQUESTS)
                .describe("Outbound peer calls by peer, operation and outcome"),
            duration: metrics
                .histogram(HTTP_CLIENT_DURATION)
                .describe("Outbound peer call latency in seconds"),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Issue `request` on behalf of the request described by `ctx`.
    pub async fn call(
        &self,
        request: PeerRequest,
        ctx: &RequestContext,
    ) -> Result<PeerResponse, NetworkError> {
        let attempts = self.settings.retry.attempts_for(&request.method);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let sample = AttemptSample::start(self, &request.operation, ctx);
            let result = self.send_once(&request, ctx).await;
            let outcome = match &result {
                Ok(_) => "success",
                Err(err) => err.outcome(),
            };
            sample.finish(outcome);

            let err = match result {
                Ok(response) => {
                    tracing::debug!(
                        correlation_id = %ctx.correlation_id(),
                        peer = %self.peer,
                        operation = %request.operation,
                        status = response.status.as_u16(),
                        attempt,
                        "peer call succeeded"
                    );
                    return Ok(response);
                }
                Err(err) => err,
            };

            if attempt >= attempts || !is_retryable(&request.method, err.status(), err.is_transport()) {
                tracing::warn!(
                    correlation_id = %ctx.correlation_id(),
                    peer = %self.peer,
                    operation = %request.operation,
                    outcome,
                    attempt,
                    error = %err,
                    "peer call failed"
                );
                return Err(err);
            }

            let delay = self.settings.retry.delay_after(attempt);
            tracing::info!(
                correlation_id = %ctx.correlation_id(),
                peer = %self.peer,
                attempt,
                delay = ?delay,
                error = %err,
                "Retrying peer call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(
        &self,
        request: &PeerRequest,
        ctx: &RequestContext,
    ) -> Result<PeerResponse, NetworkError> {
        let url = self
            .base_url
            .join(&request.path)
            .map_err(|e| NetworkError::InvalidRequest {
                peer: self.peer.clone(),
                message: e.to_string(),
            })?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(self.settings.timeout)
            .header(
                self.settings.correlation_header.clone(),
                ctx.correlation_id().as_str(),
            );
        if let Some(body) = &request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            return Err(NetworkError::Status {
                peer: self.peer.clone(),
                status,
                body,
            });
        }

        Ok(PeerResponse {
            peer: self.peer.clone(),
            status,
            headers,
            body,
        })
    }

    fn classify(&self, err: reqwest::Error) -> NetworkError {
        let peer = self.peer.clone();
        if err.is_timeout() {
            NetworkError::Timeout {
                peer,
                after: self.settings.timeout,
            }
        } else if err.is_connect() {
            NetworkError::Connect {
                peer,
                message: err.to_string(),
            }
        } else {
            NetworkError::Transport {
                peer,
                message: err.to_string(),
            }
        }
    }

    fn record(&self, operation: &str, outcome: &str, elapsed: Duration) {
        let labels = [
            ("peer", self.peer.as_str()),
            ("operation", operation),
            ("outcome", outcome),
        ];
        self.requests.add(1, &labels);
        self.duration.observe(elapsed.as_secs_f64(), &labels);
    }
}

/// Outcome label for an attempt dropped before the peer answered.
pub const CANCELLED_OUTCOME: &str = "cancelled";

/// Records exactly one outbound sample per attempt, on every exit path.
struct AttemptSample<'a> {
    client: &'a PeerClient,
    operation: &'a str,
    correlation_id: String,
    started: Instant,
    outcome: Option<&'static str>,
}

impl<'a> AttemptSample<'a> {
    fn start(client: &'a PeerClient, operation: &'a str, ctx: &RequestContext) -> Self {
        Self {
            client,
            operation,
            correlation_id: ctx.correlation_id().to_string(),
            started: Instant::now(),
            outcome: None,
        }
    }

    fn finish(mut self, outcome: &'static str) {
        self.outcome = Some(outcome);
    }
}

impl Drop for AttemptSample<'_> {
    fn drop(&mut self) {
        let outcome = match self.outcome {
            Some(outcome) => outcome,
            None => {
                tracing::debug!(
                    correlation_id = %self.correlation_id,
                    peer = %self.client.peer,
                    operation = self.operation,
                    "peer call abandoned"
                );
                CANCELLED_OUTCOME
            }
        };
        self.client
            .record(self.operation, outcome, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(code: u16) -> NetworkError {
        NetworkError::Status {
            peer: "user-service".into(),
            status: StatusCode::from_u16(code).unwrap(),
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(status_error(404).outcome(), "client_error");
        assert_eq!(status_error(503).outcome(), "server_error");
        assert_eq!(
            NetworkError::Timeout {
                peer: "p".into(),
                after: Duration::from_millis(5),
            }
            .outcome(),
            "timeout"
        );
    }

    #[test]
    fn test_conversion_to_handler_error() {
        let err: HandlerError = status_error(500).into();
        match err {
            HandlerError::DownstreamUnavailable { peer, status, .. } => {
                assert_eq!(peer, "user-service");
                assert_eq!(status, Some(500));
            }
            other => panic!("unexpected {other:?}"),
        }

        let err: HandlerError = NetworkError::Connect {
            peer: "order-service".into(),
            message: "refused".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_abandoned_call_still_records_a_sample() {
        use crate::correlation::CorrelationId;
        use crate::observability::LabelPolicy;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().fallback(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        });
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let metrics = MetricsRegistry::new(LabelPolicy::default()).unwrap();
        let client = PeerClient::new(
            "user-service",
            Url::parse(&format!("http://{addr}")).unwrap(),
            PeerSettings {
                timeout: Duration::from_secs(10),
                retry: RetryPolicy::default(),
                correlation_header: HeaderName::from_static(crate::correlation::X_CORRELATION_ID),
            },
            &metrics,
        )
        .unwrap();
        let ctx = RequestContext::new(CorrelationId::generate(), "create_order", Method::POST, "/api/orders");

        let call = client.call(PeerRequest::get("validate_user", "/api/users/1"), &ctx);
        assert!(tokio::time::timeout(Duration::from_millis(100), call).await.is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.value(
                HTTP_CLIENT_REQUESTS,
                &[("operation", "validate_user"), ("outcome", CANCELLED_OUTCOME)]
            ),
            1.0
        );
        assert_eq!(
            snapshot.value(
                &format!("{HTTP_CLIENT_DURATION}_count"),
                &[("operation", "validate_user")]
            ),
            1.0
        );
    }
}
