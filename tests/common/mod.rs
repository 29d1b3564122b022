//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceExt;

use obs_pipeline::config::{ServiceConfig, ServiceKind};
use obs_pipeline::http::ServiceServer;
use obs_pipeline::lifecycle::{self, RunningService};
use obs_pipeline::observability::{LabelPolicy, MetricsRegistry, MetricsSnapshot};
use obs_pipeline::services::build_service;

/// A port nothing listens on.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Config for a test instance: ephemeral port, every peer at `peer`, no peer probe.
pub fn service_config(kind: ServiceKind, peer: SocketAddr) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.service.kind = kind;
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.peers.user_service_url = format!("http://{peer}");
    config.peers.order_service_url = format!("http://{peer}");
    config.peers.external_service_url = format!("http://{peer}");
    config.peers.timeout_ms = 1_000;
    config.health.peer_probe_enabled = false;
    config
}

/// Start a real service on an ephemeral port.
pub async fn start_service(config: &ServiceConfig) -> RunningService {
    lifecycle::start(config).await.expect("service failed to start")
}

/// In-process router plus the registry it records into.
pub fn in_process(config: &ServiceConfig) -> (Router, MetricsRegistry) {
    let metrics = MetricsRegistry::new(LabelPolicy::default()).unwrap();
    let app = build_service(config, &metrics).unwrap();
    let server = ServiceServer::new(app, config, metrics.clone()).unwrap();
    (server.router(), metrics)
}

pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn get(router: &Router, path: &str) -> Response {
    send(router, Request::get(path).body(Body::empty()).unwrap()).await
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub fn correlation_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn snapshot(metrics: &MetricsRegistry) -> MetricsSnapshot {
    metrics.snapshot()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// A peer stand-in that records the correlation header of every request.
pub struct MockPeer {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockPeer {
    pub fn seen(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }
}

/// Start a mock peer answering every request with `status` and `body` after `delay`.
pub async fn start_mock_peer(status: u16, body: &'static str, delay: Duration) -> MockPeer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let recorder = seen.clone();
    let app = Router::new().fallback(move |headers: HeaderMap| {
        let recorder = recorder.clone();
        async move {
            let id = headers
                .get("x-correlation-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            recorder.lock().unwrap().push(id);
            tokio::time::sleep(delay).await;

            let mut response = Response::new(Body::from(body));
            *response.status_mut() = StatusCode::from_u16(status).unwrap();
            response.headers_mut().insert(
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderValue::from_static("application/json"),
            );
            response
        }
    });

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockPeer { addr, seen }
}
