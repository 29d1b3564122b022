//! Order service handlers.

use std::sync::{PoisonError, RwLock};

use axum::http::{Method, StatusCode};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{simulate_work, BusinessMetrics};
use crate::correlation::RequestContext;
use crate::observability::metrics::{Counter, Histogram, MetricsRegistry};
use crate::outbound::{NetworkError, PeerClient, PeerRequest};
use crate::pipeline::{Handler, HandlerError, HandlerResult, InboundRequest, Reply};
use crate::routing::RouteTable;

pub fn routes() -> RouteTable {
    RouteTable::new()
        .route(Method::GET, "/api/orders", "get_orders")
        .route(Method::POST, "/api/orders", "create_order")
        .route(Method::GET, "/api/orders/user/{userId}", "get_orders_by_user")
        .route(Method::GET, "/api/orders/{id}", "get_order")
        .route(Method::PUT, "/api/orders/{id}/status", "update_order_status")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub product: String,
    pub amount: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub product: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

fn seed_orders() -> Vec<Order> {
    let now = Utc::now();
    let order = |id, user_id, product: &str, amount, status: &str, age: ChronoDuration| Order {
        id,
        user_id,
        product: product.to_string(),
        amount,
        status: status.to_string(),
        created_at: now - age,
    };
    vec![
        order(1, 1, "Laptop", 999.99, "Completed", ChronoDuration::days(5)),
        order(2, 1, "Mouse", 29.99, "Completed", ChronoDuration::days(3)),
        order(3, 2, "Keyboard", 79.99, "Processing", ChronoDuration::days(1)),
        order(4, 2, "Monitor", 299.99, "Shipped", ChronoDuration::hours(12)),
    ]
}

pub struct OrderService {
    users: PeerClient,
    orders: RwLock<Vec<Order>>,
    metrics: BusinessMetrics,
    created: Counter,
    value: Histogram,
}

impl OrderService {
    pub fn new(users: PeerClient, metrics: &MetricsRegistry) -> Self {
        Self {
            users,
            orders: RwLock::new(seed_orders()),
            metrics: BusinessMetrics::new(metrics, "order"),
            created: metrics
                .counter("orders_created_total")
                .describe("Orders created by status"),
            value: metrics
                .histogram("order_value_dollars")
                .describe("Value of created orders in dollars"),
        }
    }

    async fn dispatch(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let operation = ctx.operation().to_string();
        match operation.as_str() {
            "get_orders" => self.get_orders(request, ctx).await,
            "get_order" => self.get_order(request, ctx).await,
            "get_orders_by_user" => self.get_orders_by_user(request, ctx).await,
            "create_order" => self.create_order(request, ctx).await,
            "update_order_status" => self.update_order_status(request, ctx).await,
            other => Err(HandlerError::NotFound(format!("unknown operation '{other}'"))),
        }
    }

    fn snapshot(&self) -> Vec<Order> {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn find(&self, id: i64) -> Option<Order> {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|o| o.id == id)
            .cloned()
    }

    async fn get_orders(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("get_orders", &request.method);
        simulate_work(10..100).await;

        let orders = self.snapshot();
        ctx.set_tag("order.count", orders.len());
        Reply::ok(&orders)
    }

    async fn get_order(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("get_order", &request.method);
        let id: i64 = request.param_as("id")?;
        ctx.set_tag("order.id", id);
        simulate_work(5..50).await;

        let order = self
            .find(id)
            .ok_or_else(|| HandlerError::NotFound(format!("order {id} not found")))?;
        ctx.set_tag("order.status", &order.status);
        Reply::ok(&order)
    }

    async fn get_orders_by_user(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("get_orders_by_user", &request.method);
        let user_id: i64 = request.param_as("userId")?;
        ctx.set_tag("user.id", user_id);
        simulate_work(10..80).await;

        let orders: Vec<Order> = self
            .snapshot()
            .into_iter()
            .filter(|o| o.user_id == user_id)
            .collect();
        ctx.set_tag("order.count", orders.len());

        tracing::info!(
            correlation_id = %ctx.correlation_id(),
            user_id,
            count = orders.len(),
            "Fetched orders for user"
        );
        Reply::ok(&orders)
    }

    async fn create_order(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("create_order", &request.method);
        let body: CreateOrderRequest = request.json()?;
        ctx.set_tag("user.id", body.user_id);
        ctx.set_tag("order.amount", body.amount);

        let valid_amount = body.amount.is_finite() && body.amount > 0.0;
        if body.user_id <= 0 || body.product.trim().is_empty() || !valid_amount {
            return Err(HandlerError::Validation(
                "Valid UserId, Product, and Amount are required".into(),
            ));
        }

        self.validate_user(body.user_id, ctx).await?;
        simulate_work(50..200).await;

        let order = {
            let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
            let order = Order {
                id: orders.iter().map(|o| o.id).max().unwrap_or(0) + 1,
                user_id: body.user_id,
                product: body.product,
                amount: body.amount,
                status: "Processing".to_string(),
                created_at: Utc::now(),
            };
            orders.push(order.clone());
            order
        };

        self.created.add(1, &[("status", "created")]);
        self.value.observe(order.amount, &[]);
        ctx.set_tag("order.id", order.id);

        tracing::info!(correlation_id = %ctx.correlation_id(), order_id = order.id, "Created order");
        Reply::created(&format!("/api/orders/{}", order.id), &order)
    }

    /// Ask the user service whether the user exists.
    async fn validate_user(&self, user_id: i64, ctx: &RequestContext) -> Result<(), HandlerError> {
        let request = PeerRequest::get("validate_user", format!("/api/users/{user_id}"));
        match self.users.call(request, ctx).await {
            Ok(_) => Ok(()),
            Err(NetworkError::Status { status, .. })
                if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST =>
            {
                Err(HandlerError::Validation("User not found".into()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update_order_status(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("update_order_status", &request.method);
        let id: i64 = request.param_as("id")?;
        let body: UpdateOrderStatusRequest = request.json()?;
        ctx.set_tag("order.id", id);

        let status = body.status.trim();
        if status.is_empty() {
            return Err(HandlerError::Validation("Status is required".into()));
        }
        ctx.set_tag("order.new_status", status);
        simulate_work(20..100).await;

        let (old_status, order) = {
            let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
            let order = orders
                .iter_mut()
                .find(|o| o.id == id)
                .ok_or_else(|| HandlerError::NotFound(format!("order {id} not found")))?;
            let old = std::mem::replace(&mut order.status, status.to_string());
            (old, order.clone())
        };

        tracing::info!(
            correlation_id = %ctx.correlation_id(),
            order_id = id,
            old_status = %old_status,
            new_status = %order.status,
            "Updated order status"
        );
        Reply::ok(&order)
    }
}

impl Handler for OrderService {
    fn call<'a>(
        &'a self,
        request: &'a InboundRequest,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(self.dispatch(request, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::observability::LabelPolicy;
    use crate::outbound::PeerSettings;
    use crate::resilience::RetryPolicy;
    use std::time::Duration;
    use url::Url;

    fn service(metrics: &MetricsRegistry) -> OrderService {
        let settings = PeerSettings {
            timeout: Duration::from_millis(200),
            retry: RetryPolicy::none(),
            correlation_header: axum::http::HeaderName::from_static("x-correlation-id"),
        };
        let users = PeerClient::new(
            "user-service",
            Url::parse("http://127.0.0.1:9").unwrap(),
            settings,
            metrics,
        )
        .unwrap();
        OrderService::new(users, metrics)
    }

    fn request(method: Method, path: &str, body: &str) -> (InboundRequest, RequestContext) {
        let found = routes().lookup(&method, path).unwrap();
        let mut request = InboundRequest::new(method.clone(), path);
        request.params = found.params;
        request.body = body.as_bytes().to_vec().into();
        let ctx = RequestContext::new(CorrelationId::generate(), found.operation, method, path);
        (request, ctx)
    }

    #[tokio::test]
    async fn test_seeded_orders_by_user() {
        let metrics = MetricsRegistry::new(LabelPolicy::default()).unwrap();
        let service = service(&metrics);

        let (req, mut ctx) = request(Method::GET, "/api/orders/user/2", "");
        let reply = service.call(&req, &mut ctx).await.unwrap();
        let orders: Vec<Order> = serde_json::from_slice(reply.body()).unwrap();
        let products: Vec<&str> = orders.iter().map(|o| o.product.as_str()).collect();
        assert_eq!(products, vec!["Keyboard", "Monitor"]);
        assert_eq!(ctx.tag("order.count"), Some("2"));
    }

    #[tokio::test]
    async fn test_get_order_not_found() {
        let metrics = MetricsRegistry::new(LabelPolicy::default()).unwrap();
        let service = service(&metrics);

        let (req, mut ctx) = request(Method::GET, "/api/orders/42", "");
        assert!(matches!(
            service.call(&req, &mut ctx).await,
            Err(HandlerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_status() {
        let metrics = MetricsRegistry::new(LabelPolicy::default()).unwrap();
        let service = service(&metrics);

        let (req, mut ctx) = request(Method::PUT, "/api/orders/3/status", r#"{"status":"Shipped"}"#);
        let reply = service.call(&req, &mut ctx).await.unwrap();
        let order: Order = serde_json::from_slice(reply.body()).unwrap();
        assert_eq!(order.status, "Shipped");
        assert_eq!(service.find(3).unwrap().status, "Shipped");

        let (req, mut ctx) = request(Method::PUT, "/api/orders/3/status", r#"{"status":""}"#);
        assert!(matches!(
            service.call(&req, &mut ctx).await,
            Err(HandlerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_order_validates_payload_before_calling_peer() {
        let metrics = MetricsRegistry::new(LabelPolicy::default()).unwrap();
        let service = service(&metrics);

        for body in [
            r#"{"userId":0,"product":"Desk","amount":10}"#,
            r#"{"userId":1,"product":"","amount":10}"#,
            r#"{"userId":1,"product":"Desk","amount":-1}"#,
        ] {
            let (req, mut ctx) = request(Method::POST, "/api/orders", body);
            assert!(matches!(
                service.call(&req, &mut ctx).await,
                Err(HandlerError::Validation(_))
            ));
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.value("http_client_requests_total", &[]), 0.0);
        assert_eq!(service.snapshot().len(), 4);
    }

    #[tokio::test]
    async fn test_create_order_with_unreachable_user_service() {
        let metrics = MetricsRegistry::new(LabelPolicy::default()).unwrap();
        let service = service(&metrics);

        let (req, mut ctx) = request(
            Method::POST,
            "/api/orders",
            r#"{"userId":1,"product":"Desk","amount":120.5}"#,
        );
        let err = service.call(&req, &mut ctx).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.value(
                "http_client_requests_total",
                &[("peer", "user-service"), ("operation", "validate_user")]
            ),
            1.0
        );
        assert_eq!(snapshot.value("orders_created_total", &[]), 0.0);
    }
}
