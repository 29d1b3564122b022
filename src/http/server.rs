//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the axum Router for one service
//! - Dispatch `/api/*` traffic into the request pipeline
//! - Serve health verdicts and the metrics export
//! - Bind to a listener and shut down gracefully

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::middleware::correlation_middleware;
use crate::config::ServiceConfig;
use crate::health::{HealthRegistry, HealthReport, READY_TAG};
use crate::observability::MetricsRegistry;
use crate::pipeline::{
    Handler, InboundRequest, NoRouteHandler, Pipeline, PipelineSettings, RejectedBodyHandler,
};
use crate::routing::RouteTable;
use crate::services::ServiceApp;

/// Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Operation label for requests no route matched.
const UNMATCHED_OPERATION: &str = "unmatched";
/// Operation label for requests whose body was rejected.
const REJECTED_BODY_OPERATION: &str = "rejected_body";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid correlation header: {0}")]
    CorrelationHeader(#[from] axum::http::header::InvalidHeaderName),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by all axum handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    routes: Arc<RouteTable>,
    handler: Arc<dyn Handler>,
    health: Arc<HealthRegistry>,
    metrics: MetricsRegistry,
    max_body_size: usize,
}

/// HTTP server for one service.
pub struct ServiceServer {
    router: Router,
    service: String,
}

impl ServiceServer {
    pub fn new(
        app: ServiceApp,
        config: &ServiceConfig,
        metrics: MetricsRegistry,
    ) -> Result<Self, ServerError> {
        let correlation_header = config.observability.correlation_header_name()?;
        let settings = PipelineSettings {
            service: app.name.clone(),
            correlation_header: correlation_header.clone(),
            request_timeout: Duration::from_millis(config.timeouts.request_ms),
        };
        let pipeline = Pipeline::new(settings, &metrics);
        tracing::debug!(stages = ?pipeline.stage_names(), "Pipeline assembled");

        let state = AppState {
            pipeline: Arc::new(pipeline),
            routes: Arc::new(app.routes),
            handler: app.handler,
            health: app.health,
            metrics,
            max_body_size: config.security.max_body_size,
        };

        let router = Self::build_router(config, correlation_header, state);
        Ok(Self {
            router,
            service: app.name,
        })
    }

    fn build_router(config: &ServiceConfig, correlation_header: HeaderName, state: AppState) -> Router {
        let mut ops = Router::new()
            .route("/health", get(health_all))
            .route("/health/live", get(health_all))
            .route("/health/ready", get(health_ready))
            .route("/health/ping", get(ping));
        if config.observability.metrics_enabled {
            ops = ops.route("/metrics", get(metrics_export));
        }

        let ops = ops.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn_with_state(correlation_header, correlation_middleware)),
        );
        ops.fallback(pipeline_entry).with_state(state)
    }

    /// The router, for in-process use (tests, embedding).
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(service = %self.service, address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!(service = %self.service, "HTTP server stopped");
        Ok(())
    }
}

/// Entry point for all business traffic.
async fn pipeline_entry(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let mut inbound = InboundRequest::new(parts.method, parts.uri.path());
    inbound.query = parts.uri.query().map(str::to_string);
    inbound.headers = parts.headers;

    match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => inbound.body = bytes,
        Err(e) => {
            tracing::debug!(path = %inbound.path, error = %e, "Request body rejected");
            let rejected = RejectedBodyHandler {
                limit: state.max_body_size,
            };
            return state
                .pipeline
                .handle(inbound, REJECTED_BODY_OPERATION, &rejected)
                .await;
        }
    }

    match state.routes.lookup(&inbound.method, &inbound.path) {
        Some(found) => {
            inbound.params = found.params;
            state
                .pipeline
                .handle(inbound, found.operation, state.handler.as_ref())
                .await
        }
        None => {
            state
                .pipeline
                .handle(inbound, UNMATCHED_OPERATION, &NoRouteHandler)
                .await
        }
    }
}

async fn health_all(State(state): State<AppState>) -> Response {
    health_response(state.health.evaluate(None).await)
}

async fn health_ready(State(state): State<AppState>) -> Response {
    health_response(state.health.evaluate(Some(READY_TAG)).await)
}

fn health_response(report: HealthReport) -> Response {
    (report.http_status(), Json(report)).into_response()
}

/// Answers without running checks; used by peers' probes.
async fn ping() -> &'static str {
    "ok"
}

async fn metrics_export(State(state): State<AppState>) -> Response {
    let mut response = Response::new(Body::from(state.metrics.render()));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(METRICS_CONTENT_TYPE),
    );
    response
}
