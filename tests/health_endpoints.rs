//! Health verdicts served over HTTP.

use axum::http::StatusCode;
use axum::Router;

use obs_pipeline::config::ServiceKind;
use obs_pipeline::health::{CheckOptions, HealthCheckResult, HealthReport, HealthStatus, READY_TAG};
use obs_pipeline::http::ServiceServer;
use obs_pipeline::observability::{LabelPolicy, MetricsRegistry};
use obs_pipeline::services::{build_service, ServiceApp};

mod common;

fn router_with(register: impl FnOnce(&ServiceApp)) -> Router {
    let config = common::service_config(ServiceKind::Order, common::unused_addr());
    let metrics = MetricsRegistry::new(LabelPolicy::default()).unwrap();
    let app = build_service(&config, &metrics).unwrap();
    register(&app);
    ServiceServer::new(app, &config, metrics).unwrap().router()
}

async fn fetch_report(router: &Router, path: &str) -> (StatusCode, HealthReport) {
    let response = common::get(router, path).await;
    let status = response.status();
    let report = serde_json::from_slice(&common::body_bytes(response).await).unwrap();
    (status, report)
}

fn broken() -> HealthCheckResult {
    panic!("connection pool exhausted")
}

#[tokio::test]
async fn test_default_service_is_healthy() {
    let router = router_with(|_| {});

    let (status, report) = fetch_report(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.checks.contains_key("self"));
    assert!(report.warning.is_none());
}

#[tokio::test]
async fn test_raising_check_makes_service_unhealthy() {
    let router = router_with(|app| {
        app.health
            .register_fn("database", CheckOptions::default(), broken);
    });

    let (status, report) = fetch_report(&router, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert_eq!(report.checks.len(), 2);

    let failed = &report.checks["database"];
    assert_eq!(failed.status, HealthStatus::Unhealthy);
    assert!(failed
        .cause
        .as_deref()
        .unwrap_or_default()
        .contains("connection pool exhausted"));
    assert_eq!(report.checks["self"].status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_degraded_check_still_answers_ok() {
    let router = router_with(|app| {
        app.health.register_fn("cache", CheckOptions::default(), || {
            HealthCheckResult::degraded("hit rate low")
        });
    });

    let (status, report) = fetch_report(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.warning.unwrap().contains("cache"));
}

#[tokio::test]
async fn test_ready_only_runs_ready_checks() {
    let router = router_with(|app| {
        app.health.register_fn("batch-queue", CheckOptions::default(), || {
            HealthCheckResult::unhealthy("backlog", None)
        });
        app.health.register_fn(
            "config-store",
            CheckOptions::tagged([READY_TAG]),
            || HealthCheckResult::Healthy,
        );
    });

    let (status, report) = fetch_report(&router, "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert!(report.checks.contains_key("config-store"));
    assert!(!report.checks.contains_key("batch-queue"));

    let (status, _) = fetch_report(&router, "/health/live").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_ping_skips_checks() {
    let router = router_with(|app| {
        app.health
            .register_fn("database", CheckOptions::default(), broken);
    });

    let response = common::get(&router, "/health/ping").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::body_bytes(response).await, b"ok");
}

#[tokio::test]
async fn test_user_service_reports_backing_checks() {
    let config = common::service_config(ServiceKind::User, common::unused_addr());
    let (router, _) = common::in_process(&config);

    for path in ["/health", "/health/live", "/health/ready"] {
        let (status, report) = fetch_report(&router, path).await;
        assert_eq!(status, StatusCode::OK, "{path}");
        for name in ["self", "database", "external-service"] {
            assert_eq!(report.checks[name].status, HealthStatus::Healthy, "{path} {name}");
        }
    }
}
