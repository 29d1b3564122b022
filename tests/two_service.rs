//! Two services talking over real sockets.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use obs_pipeline::config::ServiceKind;
use obs_pipeline::pipeline::{DomainErrorBody, ErrorEnvelope};

mod common;

#[tokio::test]
async fn test_generated_id_is_propagated_to_peer() {
    let peer = common::start_mock_peer(200, "[]", Duration::ZERO).await;
    let users = common::start_service(&common::service_config(ServiceKind::User, peer.addr)).await;

    let response = common::client()
        .get(format!("http://{}/api/users/3/orders", users.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let returned = response
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("correlation header");

    assert_eq!(peer.seen(), vec![Some(returned)]);
    users.stop().await.unwrap();
}

#[tokio::test]
async fn test_correlation_id_flows_through_real_chain() {
    let orders =
        common::start_service(&common::service_config(ServiceKind::Order, common::unused_addr())).await;
    let users = common::start_service(&common::service_config(ServiceKind::User, orders.addr)).await;

    let response = common::client()
        .get(format!("http://{}/api/users/1/orders", users.addr))
        .header("x-correlation-id", "chain-42")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-correlation-id"], "chain-42");

    let body: Vec<Value> = response.json().await.unwrap();
    assert!(!body.is_empty());
    assert!(body.iter().all(|order| order["userId"] == 1));

    let outbound = users.metrics.snapshot();
    assert_eq!(
        outbound.value(
            "http_client_requests_total",
            &[
                ("peer", "order-service"),
                ("operation", "get_orders_by_user"),
                ("outcome", "success"),
            ]
        ),
        1.0
    );
    let inbound = orders.metrics.snapshot();
    assert_eq!(
        inbound.value(
            "http_server_requests_total",
            &[("operation", "get_orders_by_user"), ("outcome", "success")]
        ),
        1.0
    );

    users.stop().await.unwrap();
    orders.stop().await.unwrap();
}

#[tokio::test]
async fn test_slow_user_service_fails_order_creation() {
    let peer = common::start_mock_peer(200, r#"{"id":1}"#, Duration::from_secs(2)).await;
    let mut config = common::service_config(ServiceKind::Order, peer.addr);
    config.peers.timeout_ms = 200;
    let orders = common::start_service(&config).await;

    let response = common::client()
        .post(format!("http://{}/api/orders", orders.addr))
        .header("x-correlation-id", "slow-1")
        .json(&json!({ "userId": 1, "product": "Desk", "amount": 120.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let envelope: ErrorEnvelope = response.json().await.unwrap();
    assert_eq!(envelope.correlation_id, "slow-1");
    assert!(envelope.error.starts_with("downstream_unavailable"));

    let snapshot = orders.metrics.snapshot();
    assert_eq!(
        snapshot.value(
            "http_client_requests_total",
            &[
                ("peer", "user-service"),
                ("operation", "validate_user"),
                ("outcome", "timeout"),
            ]
        ),
        1.0
    );
    assert_eq!(
        snapshot.value("http_server_errors_total", &[("kind", "downstream_unavailable")]),
        1.0
    );
    assert_eq!(
        snapshot.value("orders_created_total", &[]),
        0.0
    );

    orders.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_user_is_a_validation_failure() {
    let peer = common::start_mock_peer(404, r#"{"kind":"not_found","message":"User not found"}"#, Duration::ZERO).await;
    let orders = common::start_service(&common::service_config(ServiceKind::Order, peer.addr)).await;

    let response = common::client()
        .post(format!("http://{}/api/orders", orders.addr))
        .json(&json!({ "userId": 77, "product": "Desk", "amount": 120.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: DomainErrorBody = response.json().await.unwrap();
    assert_eq!(body.kind, "validation");
    assert_eq!(body.message, "User not found");

    orders.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_user_service_is_a_bad_gateway() {
    let peer = common::start_mock_peer(500, r#"{"error":"boom"}"#, Duration::ZERO).await;
    let orders = common::start_service(&common::service_config(ServiceKind::Order, peer.addr)).await;

    let response = common::client()
        .post(format!("http://{}/api/orders", orders.addr))
        .json(&json!({ "userId": 1, "product": "Desk", "amount": 120.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let text = response.text().await.unwrap();
    assert!(!text.contains("boom"), "peer body leaked: {text}");

    let snapshot = orders.metrics.snapshot();
    assert_eq!(
        snapshot.value(
            "http_client_requests_total",
            &[("peer", "user-service"), ("outcome", "server_error")]
        ),
        1.0
    );

    orders.stop().await.unwrap();
}

#[tokio::test]
async fn test_order_creation_against_real_user_service() {
    let users =
        common::start_service(&common::service_config(ServiceKind::User, common::unused_addr())).await;
    let orders = common::start_service(&common::service_config(ServiceKind::Order, users.addr)).await;

    let response = common::client()
        .post(format!("http://{}/api/orders", orders.addr))
        .json(&json!({ "userId": 2, "product": "Desk", "amount": 120.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let order: Value = response.json().await.unwrap();
    assert_eq!(order["userId"], 2);
    assert_eq!(order["status"], "Processing");

    let snapshot = orders.metrics.snapshot();
    assert_eq!(snapshot.value("orders_created_total", &[("status", "created")]), 1.0);
    assert_eq!(snapshot.value("order_value_dollars_count", &[]), 1.0);

    let served = users.metrics.snapshot();
    assert_eq!(
        served.value("user_requests_total", &[("endpoint", "get_user")]),
        1.0
    );

    orders.stop().await.unwrap();
    users.stop().await.unwrap();
}

#[tokio::test]
async fn test_readiness_follows_peer_reachability() {
    let healthy_peer =
        common::start_service(&common::service_config(ServiceKind::Order, common::unused_addr())).await;

    let mut config = common::service_config(ServiceKind::User, healthy_peer.addr);
    config.health.peer_probe_enabled = true;
    config.health.check_timeout_ms = 500;
    let users = common::start_service(&config).await;

    let ready = common::client()
        .get(format!("http://{}/health/ready", users.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
    let report: Value = ready.json().await.unwrap();
    assert_eq!(report["status"], "Healthy");
    assert!(report["checks"].get("peer:order-service").is_some());
    users.stop().await.unwrap();
    healthy_peer.stop().await.unwrap();

    let mut config = common::service_config(ServiceKind::User, common::unused_addr());
    config.health.peer_probe_enabled = true;
    config.health.check_timeout_ms = 500;
    let isolated = common::start_service(&config).await;

    let ready = common::client()
        .get(format!("http://{}/health/ready", isolated.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    let report: Value = ready.json().await.unwrap();
    assert_eq!(report["status"], "Unhealthy");

    let ping = common::client()
        .get(format!("http://{}/health/ping", isolated.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(ping.status(), StatusCode::OK);

    isolated.stop().await.unwrap();
}

#[tokio::test]
async fn test_service_stops_on_shutdown() {
    let users =
        common::start_service(&common::service_config(ServiceKind::User, common::unused_addr())).await;
    let addr = users.addr;

    users.stop().await.unwrap();

    let result = common::client()
        .get(format!("http://{addr}/health/ping"))
        .timeout(Duration::from_millis(500))
        .send()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_deadline_before_peer_timeout_still_samples_outbound_call() {
    let peer = common::start_mock_peer(200, r#"{"id":1}"#, Duration::from_secs(2)).await;
    let mut config = common::service_config(ServiceKind::Order, peer.addr);
    config.timeouts.request_ms = 150;
    config.peers.timeout_ms = 1_000;
    let orders = common::start_service(&config).await;

    let response = common::client()
        .post(format!("http://{}/api/orders", orders.addr))
        .json(&json!({ "userId": 1, "product": "Desk", "amount": 120.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    let snapshot = orders.metrics.snapshot();
    assert_eq!(
        snapshot.value(
            "http_client_requests_total",
            &[
                ("peer", "user-service"),
                ("operation", "validate_user"),
                ("outcome", "cancelled"),
            ]
        ),
        1.0
    );
    assert_eq!(
        snapshot.value(
            "http_client_request_duration_seconds_count",
            &[("operation", "validate_user")]
        ),
        1.0
    );

    orders.stop().await.unwrap();
}

#[tokio::test]
async fn test_external_call_reports_dependency_status() {
    let dependency = common::start_mock_peer(200, "{}", Duration::ZERO).await;
    let users =
        common::start_service(&common::service_config(ServiceKind::User, dependency.addr)).await;

    let response = common::client()
        .get(format!("http://{}/api/external-call", users.addr))
        .header("x-correlation-id", "ext-1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "External call completed");
    assert_eq!(body["statusCode"], 200);
    assert_eq!(dependency.seen(), vec![Some("ext-1".to_string())]);

    let snapshot = users.metrics.snapshot();
    assert_eq!(
        snapshot.value(
            "http_client_requests_total",
            &[
                ("peer", "external-service"),
                ("operation", "external_call"),
                ("outcome", "success"),
            ]
        ),
        1.0
    );
    assert_eq!(
        snapshot.value("business_operations_total", &[("operation", "external_call")]),
        1.0
    );

    users.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_external_call_is_a_structured_failure() {
    let dependency = common::start_mock_peer(500, r#"{"error":"upstream exploded"}"#, Duration::ZERO).await;
    let users =
        common::start_service(&common::service_config(ServiceKind::User, dependency.addr)).await;

    let response = common::client()
        .get(format!("http://{}/api/external-call", users.addr))
        .header("x-correlation-id", "ext-2")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let text = response.text().await.unwrap();
    assert!(!text.contains("upstream exploded"), "dependency body leaked: {text}");
    let envelope: ErrorEnvelope = serde_json::from_str(&text).unwrap();
    assert_eq!(envelope.correlation_id, "ext-2");
    assert!(envelope.error.starts_with("downstream_unavailable"));

    users.stop().await.unwrap();
}
