//! Sample services hosted behind the pipeline.
//!
//! # Data Flow
//! ```text
//! ServiceConfig
//!     → build_service()
//!     → PeerClient for the other service + health checks
//!     → ServiceApp { routes, handler, health }
//!     → handed to the HTTP server
//! ```
//!
//! # Design Decisions
//! - Handlers dispatch on the operation name chosen by the route table
//! - Domain failures are returned as `HandlerError` variants, never panics
//! - Business metrics are recorded alongside, not instead of, the pipeline's own

pub mod orders;
pub mod users;

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header::InvalidHeaderName;
use axum::http::Method;
use rand::Rng;
use thiserror::Error;
use url::Url;

use crate::config::{ServiceConfig, ServiceKind};
use crate::health::checks::ProbeError;
use crate::health::{
    CheckOptions, HealthCheckResult, HealthRegistry, PeerProbe, SelfCheck, READY_TAG,
};
use crate::observability::metrics::{Counter, Histogram, MetricsRegistry};
use crate::outbound::{PeerClient, PeerSettings};
use crate::pipeline::Handler;
use crate::resilience::RetryPolicy;
use crate::routing::RouteTable;

pub use orders::OrderService;
pub use users::UserService;

pub const USER_SERVICE: &str = "user-service";
pub const ORDER_SERVICE: &str = "order-service";
pub const EXTERNAL_SERVICE: &str = "external-service";

/// Error building a service from configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid peer url: {0}")]
    PeerUrl(#[from] url::ParseError),

    #[error("invalid correlation header: {0}")]
    CorrelationHeader(#[from] InvalidHeaderName),

    #[error("failed to build peer client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Everything the HTTP host needs to serve one service.
pub struct ServiceApp {
    pub name: String,
    pub kind: ServiceKind,
    pub routes: RouteTable,
    pub handler: Arc<dyn Handler>,
    pub health: Arc<HealthRegistry>,
}

/// Assemble the configured service.
pub fn build_service(
    config: &ServiceConfig,
    metrics: &MetricsRegistry,
) -> Result<ServiceApp, BuildError> {
    let kind = config.service.kind;
    let (peer_name, peer_url) = match kind {
        ServiceKind::User => (ORDER_SERVICE, config.peers.order_service_url.as_str()),
        ServiceKind::Order => (USER_SERVICE, config.peers.user_service_url.as_str()),
    };
    let peer_url = Url::parse(peer_url)?;

    let correlation_header = config.observability.correlation_header_name()?;
    let settings = PeerSettings {
        timeout: Duration::from_millis(config.peers.timeout_ms),
        retry: RetryPolicy::from(&config.peers.retries),
        correlation_header: correlation_header.clone(),
    };
    let peer = PeerClient::new(peer_name, peer_url.clone(), settings.clone(), metrics)?;

    let check_timeout = Duration::from_millis(config.health.check_timeout_ms);
    let health = Arc::new(HealthRegistry::new(check_timeout));
    health.register_with("self", SelfCheck, CheckOptions::tagged(["live", READY_TAG]));
    if config.health.peer_probe_enabled {
        let probe = PeerProbe::new(
            peer_name,
            &peer_url,
            &config.health.peer_probe_path,
            check_timeout,
            correlation_header,
        )?;
        health.register_with(
            format!("peer:{peer_name}"),
            probe,
            CheckOptions::tagged([READY_TAG]),
        );
    }

    let (routes, handler): (RouteTable, Arc<dyn Handler>) = match kind {
        ServiceKind::User => {
            let dependency = ExternalDependency {
                client: PeerClient::new(
                    EXTERNAL_SERVICE,
                    Url::parse(&config.peers.external_service_url)?,
                    settings,
                    metrics,
                )?,
                path: config.peers.external_call_path.clone(),
            };
            register_backing_checks(&health);
            (
                users::routes(),
                Arc::new(UserService::new(peer, dependency, metrics)),
            )
        }
        ServiceKind::Order => (orders::routes(), Arc::new(OrderService::new(peer, metrics))),
    };

    tracing::info!(
        service = %config.service.display_name(),
        peer = peer_name,
        peer_url = %peer_url,
        routes = routes.routes().len(),
        "Service assembled"
    );

    Ok(ServiceApp {
        name: config.service.display_name(),
        kind,
        routes,
        handler,
        health,
    })
}

/// The third-party dependency the user service calls out to.
pub struct ExternalDependency {
    pub client: PeerClient,
    pub path: String,
}

/// Static checks for the backing stores the sample user service stands in for.
fn register_backing_checks(health: &HealthRegistry) {
    for name in ["database", EXTERNAL_SERVICE] {
        health.register_fn(name, CheckOptions::tagged(["live", READY_TAG]), || {
            HealthCheckResult::Healthy
        });
    }
}

/// Per-service request counter and latency histogram, labelled by endpoint,
/// plus the `business_operations_total` counter shared by every service.
#[derive(Debug, Clone)]
pub(crate) struct BusinessMetrics {
    requests: Counter,
    duration: Histogram,
    operations: Counter,
}

impl BusinessMetrics {
    pub(crate) fn new(metrics: &MetricsRegistry, prefix: &str) -> Self {
        Self {
            requests: metrics
                .counter(&format!("{prefix}_requests_total"))
                .describe("Business requests by endpoint and method"),
            duration: metrics
                .histogram(&format!("{prefix}_request_duration_seconds"))
                .describe("Business endpoint latency in seconds"),
            operations: metrics
                .counter("business_operations_total")
                .describe("Business operations by name"),
        }
    }

    /// Count the request now; the duration is recorded when the timer drops.
    pub(crate) fn start(&self, endpoint: &'static str, method: &Method) -> EndpointTimer<'_> {
        self.requests
            .add(1, &[("endpoint", endpoint), ("method", method.as_str())]);
        self.operations.add(1, &[("operation", endpoint)]);
        EndpointTimer {
            duration: &self.duration,
            endpoint,
            started: Instant::now(),
        }
    }
}

pub(crate) struct EndpointTimer<'a> {
    duration: &'a Histogram,
    endpoint: &'static str,
    started: Instant,
}

impl Drop for EndpointTimer<'_> {
    fn drop(&mut self) {
        self.duration.observe(
            self.started.elapsed().as_secs_f64(),
            &[("endpoint", self.endpoint)],
        );
    }
}

/// Stand-in for storage latency.
pub(crate) async fn simulate_work(range_ms: Range<u64>) {
    let ms = rand::thread_rng().gen_range(range_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
