//! User service handlers.

use std::time::Duration;

use axum::http::{header, HeaderValue, Method, StatusCode};
use chrono::{SecondsFormat, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{simulate_work, BusinessMetrics, ExternalDependency};
use crate::correlation::RequestContext;
use crate::observability::MetricsRegistry;
use crate::outbound::{PeerClient, PeerRequest};
use crate::pipeline::{Handler, HandlerError, HandlerResult, InboundRequest, Reply};
use crate::routing::RouteTable;

/// Ids above this do not exist.
const MAX_USER_ID: i64 = 1000;
/// Upper bound for `simulate-delay`.
const MAX_SIMULATED_DELAY_MS: u64 = 10_000;
const DEFAULT_SIMULATED_DELAY_MS: u64 = 100;

pub fn routes() -> RouteTable {
    RouteTable::new()
        .route(Method::GET, "/api/users", "get_users")
        .route(Method::POST, "/api/users", "create_user")
        .route(Method::GET, "/api/users/{id}/orders", "get_user_orders")
        .route(Method::GET, "/api/users/{id}", "get_user")
        .route(Method::GET, "/api/simulate-error", "simulate_error")
        .route(Method::GET, "/api/simulate-delay", "simulate_delay")
        .route(Method::GET, "/api/database-operation", "database_query")
        .route(Method::GET, "/api/external-call", "external_call")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub department: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub department: Option<String>,
}

pub struct UserService {
    orders: PeerClient,
    external: ExternalDependency,
    metrics: BusinessMetrics,
}

impl UserService {
    pub fn new(orders: PeerClient, external: ExternalDependency, metrics: &MetricsRegistry) -> Self {
        Self {
            orders,
            external,
            metrics: BusinessMetrics::new(metrics, "user"),
        }
    }

    async fn dispatch(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let operation = ctx.operation().to_string();
        match operation.as_str() {
            "get_users" => self.get_users(request, ctx).await,
            "get_user" => self.get_user(request, ctx).await,
            "create_user" => self.create_user(request, ctx).await,
            "get_user_orders" => self.get_user_orders(request, ctx).await,
            "simulate_error" => {
                let _timer = self.metrics.start("simulate_error", &request.method);
                simulate_error(ctx)
            }
            "simulate_delay" => {
                let _timer = self.metrics.start("simulate_delay", &request.method);
                simulate_delay(request, ctx).await
            }
            "database_query" => self.database_query(request, ctx).await,
            "external_call" => self.external_call(request, ctx).await,
            other => Err(HandlerError::NotFound(format!("unknown operation '{other}'"))),
        }
    }

    async fn get_users(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("get_users", &request.method);
        let users = vec![
            User {
                id: 1,
                name: "John Doe".into(),
                email: "john@example.com".into(),
                department: "Engineering".into(),
            },
            User {
                id: 2,
                name: "Jane Smith".into(),
                email: "jane@example.com".into(),
                department: "Marketing".into(),
            },
        ];
        ctx.set_tag("user.count", users.len());

        simulate_work(10..100).await;
        tracing::info!(correlation_id = %ctx.correlation_id(), count = users.len(), "Fetched users");
        Reply::ok(&users)
    }

    async fn get_user(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("get_user", &request.method);
        let id: i64 = request.param_as("id")?;
        ctx.set_tag("user.id", id);

        simulate_work(5..50).await;

        if id <= 0 {
            return Err(HandlerError::Validation("Invalid user ID".into()));
        }
        if id > MAX_USER_ID {
            return Err(HandlerError::NotFound(format!("user {id} not found")));
        }

        Reply::ok(&User {
            id,
            name: format!("User {id}"),
            email: format!("user{id}@example.com"),
            department: "Engineering".into(),
        })
    }

    async fn create_user(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("create_user", &request.method);
        let body: CreateUserRequest = request.json()?;

        if body.name.trim().is_empty() || body.email.trim().is_empty() {
            return Err(HandlerError::Validation("Name and Email are required".into()));
        }

        simulate_work(20..100).await;

        let id = rand::random::<u16>() as i64 % 9000 + 1000;
        ctx.set_tag("user.id", id);
        let user = User {
            id,
            name: body.name,
            email: body.email,
            department: body.department.unwrap_or_else(|| "General".into()),
        };

        tracing::info!(correlation_id = %ctx.correlation_id(), user_id = id, "Created user");
        Reply::created(&format!("/api/users/{id}"), &user)
    }

    async fn get_user_orders(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("get_user_orders", &request.method);
        let id: i64 = request.param_as("id")?;
        ctx.set_tag("user.id", id);

        let response = self
            .orders
            .call(
                PeerRequest::get("get_orders_by_user", format!("/api/orders/user/{id}")),
                ctx,
            )
            .await?;

        let mut reply = Reply::new(StatusCode::OK, response.body);
        reply
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(reply)
    }

    async fn database_query(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("database_query", &request.method);
        simulate_work(10..100).await;

        tracing::info!(correlation_id = %ctx.correlation_id(), "Database operation completed");
        Reply::ok(&serde_json::json!({
            "message": "Database operation completed",
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }))
    }

    /// A failed call surfaces as a downstream failure envelope, never as a 200.
    async fn external_call(&self, request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
        let _timer = self.metrics.start("external_call", &request.method);
        ctx.set_tag("external.peer", self.external.client.peer());

        let response = self
            .external
            .client
            .call(PeerRequest::get("external_call", self.external.path.clone()), ctx)
            .await?;

        Reply::ok(&serde_json::json!({
            "message": "External call completed",
            "statusCode": response.status.as_u16(),
        }))
    }
}

impl Handler for UserService {
    fn call<'a>(
        &'a self,
        request: &'a InboundRequest,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(self.dispatch(request, ctx))
    }
}

fn simulate_error(ctx: &mut RequestContext) -> HandlerResult {
    ctx.set_tag("simulated", true);
    let cause = std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "user store connection reset by 10.0.3.17:5432",
    );
    Err(HandlerError::unexpected(cause))
}

async fn simulate_delay(request: &InboundRequest, ctx: &mut RequestContext) -> HandlerResult {
    let ms = match request.query_param("ms") {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| HandlerError::Validation(format!("invalid ms '{raw}'")))?,
        None => DEFAULT_SIMULATED_DELAY_MS,
    };
    if ms > MAX_SIMULATED_DELAY_MS {
        return Err(HandlerError::Validation(format!(
            "ms must be at most {MAX_SIMULATED_DELAY_MS}"
        )));
    }
    ctx.set_tag("delay_ms", ms);

    tokio::time::sleep(Duration::from_millis(ms)).await;
    Reply::ok(&serde_json::json!({ "delayedMs": ms }))
}
