//! The four wrapping stages of the request pipeline.
//!
//! Every stage does its "after" work on all exit paths. Normal returns are
//! handled inline; a dropped future (client disconnect) is handled by the
//! guards' `Drop` impls.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use axum::http::{HeaderName, StatusCode};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::envelope::failure_reply;
use super::handler::{ErrorKind, HandlerError, HandlerResult, Reply};
use super::{Exchange, Next, Stage};
use crate::correlation::{self, CorrelationId, RequestContext};
use crate::observability::metrics::{
    Counter, Gauge, Histogram, MetricsRegistry, HTTP_SERVER_DURATION, HTTP_SERVER_ERRORS,
    HTTP_SERVER_IN_FLIGHT, HTTP_SERVER_REQUESTS,
};

/// Status recorded when the client went away before a response existed.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Coarse status bucket used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    Success,
    ClientError,
    ServerError,
}

impl OutcomeClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            400..=499 => OutcomeClass::ClientError,
            500..=599 => OutcomeClass::ServerError,
            _ => OutcomeClass::Success,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClass::Success => "success",
            OutcomeClass::ClientError => "client_error",
            OutcomeClass::ServerError => "server_error",
        }
    }
}

fn result_status(result: &HandlerResult) -> u16 {
    match result {
        Ok(reply) => reply.status().as_u16(),
        Err(err) => err.status().as_u16(),
    }
}

/// Write the correlation header onto a reply.
///
/// Falls back to a generated id if the value cannot be encoded.
pub(crate) fn attach_correlation(reply: &mut Reply, header: &HeaderName, id: &CorrelationId) {
    let value = match id.to_header_value() {
        Ok(value) => value,
        Err(_) => {
            let fallback = CorrelationId::generate();
            tracing::warn!(
                rejected = %id,
                fallback = %fallback,
                "Correlation id not encodable as header, using fallback"
            );
            match fallback.to_header_value() {
                Ok(value) => value,
                Err(_) => return,
            }
        }
    };
    reply.headers_mut().insert(header.clone(), value);
}

// ---------------------------------------------------------------------------
// 1. Correlation
// ---------------------------------------------------------------------------

/// Acquires the correlation id and echoes it on the response.
#[derive(Debug, Clone)]
pub struct CorrelationStage {
    header: HeaderName,
}

impl CorrelationStage {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Stage for CorrelationStage {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let (id, source) = correlation::acquire(&exchange.request.headers, &self.header);
            exchange.context.assign_correlation(id, source);

            let result = next.run(&mut *exchange).await;

            let id = exchange.context.correlation_id();
            result.map(|mut reply| {
                attach_correlation(&mut reply, &self.header, id);
                reply
            })
        })
    }
}

// ---------------------------------------------------------------------------
// 2. Logging
// ---------------------------------------------------------------------------

/// Emits "request started" / "request completed" records.
#[derive(Debug, Clone)]
pub struct LoggingStage {
    service: String,
}

impl LoggingStage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

/// Completion record that is still written if the request is dropped.
struct RequestLog<'a> {
    service: &'a str,
    correlation_id: String,
    operation: String,
    method: String,
    path: String,
    started: Instant,
    completed: bool,
}

impl<'a> RequestLog<'a> {
    fn start(service: &'a str, ctx: &RequestContext) -> Self {
        tracing::info!(
            service,
            correlation_id = %ctx.correlation_id(),
            id_source = ctx.id_source().as_str(),
            operation = ctx.operation(),
            method = %ctx.method(),
            path = ctx.path(),
            "request started"
        );
        Self {
            service,
            correlation_id: ctx.correlation_id().to_string(),
            operation: ctx.operation().to_string(),
            method: ctx.method().to_string(),
            path: ctx.path().to_string(),
            started: Instant::now(),
            completed: false,
        }
    }

    fn complete(mut self, status: u16, ctx: &RequestContext) {
        self.completed = true;
        tracing::info!(
            service = self.service,
            correlation_id = %self.correlation_id,
            operation = %self.operation,
            method = %self.method,
            path = %self.path,
            status,
            elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0,
            tags = ?ctx.tags(),
            "request completed"
        );
    }
}

impl Drop for RequestLog<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        tracing::warn!(
            service = self.service,
            correlation_id = %self.correlation_id,
            operation = %self.operation,
            method = %self.method,
            path = %self.path,
            status = CLIENT_CLOSED_REQUEST,
            elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0,
            cancelled = true,
            "request completed"
        );
    }
}

impl Stage for LoggingStage {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let log = RequestLog::start(&self.service, &exchange.context);
            let result = next.run(&mut *exchange).await;
            log.complete(result_status(&result), &exchange.context);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// 3. Timing / metrics
// ---------------------------------------------------------------------------

/// Records in-flight count, request count and latency per operation.
#[derive(Debug, Clone)]
pub struct TimingStage {
    requests: Counter,
    duration: Histogram,
    in_flight: Gauge,
    errors: Counter,
}

impl TimingStage {
    pub fn new(metrics: &MetricsRegistry) -> Self {
        Self {
            requests: metrics
                .counter(HTTP_SERVER_REQUESTS)
                .describe("Inbound requests by operation and outcome"),
            duration: metrics
                .histogram(HTTP_SERVER_DURATION)
                .describe("Inbound request latency in seconds"),
            in_flight: metrics
                .gauge(HTTP_SERVER_IN_FLIGHT)
                .describe("Inbound requests currently executing"),
            errors: metrics
                .counter(HTTP_SERVER_ERRORS)
                .describe("Failed requests by failure kind"),
        }
    }
}

/// RAII guard pairing every in-flight increment with a decrement.
struct InFlight<'a> {
    stage: &'a TimingStage,
    operation: String,
    started: Instant,
    completed: bool,
}

impl<'a> InFlight<'a> {
    fn enter(stage: &'a TimingStage, operation: &str) -> Self {
        stage.in_flight.add(1, &[("operation", operation)]);
        Self {
            stage,
            operation: operation.to_string(),
            started: Instant::now(),
            completed: false,
        }
    }

    fn record(&self, outcome: OutcomeClass) {
        let labels = [("operation", self.operation.as_str()), ("outcome", outcome.as_str())];
        self.stage.requests.add(1, &labels);
        self.stage
            .duration
            .observe(self.started.elapsed().as_secs_f64(), &labels);
    }

    fn complete(mut self, status: u16) {
        self.completed = true;
        self.record(OutcomeClass::from_status(status));
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.record(OutcomeClass::ClientError);
            self.stage
                .errors
                .add(1, &[("kind", ErrorKind::Cancelled.as_str())]);
        }
        self.stage
            .in_flight
            .add(-1, &[("operation", self.operation.as_str())]);
    }
}

impl Stage for TimingStage {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let guard = InFlight::enter(self, exchange.context.operation());
            let result = next.run(&mut *exchange).await;
            guard.complete(result_status(&result));
            result
        })
    }
}

// ---------------------------------------------------------------------------
// 4. Error handling
// ---------------------------------------------------------------------------

/// Last line of defence: turns every failure into a reply.
///
/// Also bounds handler execution by the request deadline and catches panics.
#[derive(Debug, Clone)]
pub struct ErrorStage {
    errors: Counter,
    deadline: Duration,
}

impl ErrorStage {
    pub fn new(metrics: &MetricsRegistry, deadline: Duration) -> Self {
        Self {
            errors: metrics.counter(HTTP_SERVER_ERRORS),
            deadline,
        }
    }

    fn recover(&self, err: HandlerError, ctx: &RequestContext) -> Reply {
        let kind = err.kind();
        self.errors.add(1, &[("kind", kind.as_str())]);

        match &err {
            HandlerError::Validation(_) | HandlerError::NotFound(_) => tracing::warn!(
                correlation_id = %ctx.correlation_id(),
                operation = ctx.operation(),
                kind = kind.as_str(),
                error = %err,
                "request rejected"
            ),
            HandlerError::DownstreamUnavailable { .. } | HandlerError::Timeout(_) => tracing::error!(
                correlation_id = %ctx.correlation_id(),
                operation = ctx.operation(),
                kind = kind.as_str(),
                error = %err,
                "request failed"
            ),
            HandlerError::Unexpected(source) => tracing::error!(
                correlation_id = %ctx.correlation_id(),
                operation = ctx.operation(),
                kind = kind.as_str(),
                error = %err,
                detail = ?source,
                tags = ?ctx.tags(),
                "unhandled failure"
            ),
        }

        failure_reply(&err, ctx.correlation_id())
    }
}

impl Stage for ErrorStage {
    fn name(&self) -> &'static str {
        "error_handling"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            // The handler is invoked inside the guarded future so a panic
            // raised before its future exists is caught too.
            let inner = &mut *exchange;
            let guarded = AssertUnwindSafe(async move { next.run(inner).await }).catch_unwind();
            let failure = match tokio::time::timeout(self.deadline, guarded).await {
                Ok(Ok(Ok(reply))) => return Ok(reply),
                Ok(Ok(Err(err))) => err,
                Ok(Err(panic)) => HandlerError::from_panic(panic),
                Err(_) => HandlerError::Timeout(self.deadline),
            };
            Ok(self.recover(failure, &exchange.context))
        })
    }
}
