//! Request pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! InboundRequest + operation name
//!     → correlation (acquire id, echo header on the way out)
//!     → logging     (request started / request completed)
//!     → timing      (in-flight gauge, request counter, latency histogram)
//!     → errors      (deadline, panic capture, failure → reply)
//!     → Handler     (business endpoint)
//! ```
//!
//! # Design Decisions
//! - Stages are an explicit ordered list run by a small runner, not host middleware
//! - Each stage's "after" work runs on every exit path, including drop
//! - The context is threaded through as an argument; no task-local lookups
//! - The runner itself re-attaches a correlation id if a stage failed to

pub mod envelope;
pub mod handler;
pub mod stages;

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use axum::response::Response;
use futures_util::future::BoxFuture;

pub use envelope::{DomainErrorBody, ErrorEnvelope};
pub use handler::{
    BoxError, ErrorKind, Handler, HandlerError, HandlerResult, InboundRequest, NoRouteHandler,
    RejectedBodyHandler, Reply,
};
pub use stages::{CorrelationStage, ErrorStage, LoggingStage, OutcomeClass, TimingStage};

use crate::correlation::{CorrelationId, RequestContext};
use crate::observability::MetricsRegistry;

/// A request and its context as they move through the stages.
#[derive(Debug)]
pub struct Exchange {
    pub request: InboundRequest,
    pub context: RequestContext,
}

/// One wrapping step of the pipeline.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run this stage around the rest of the chain.
    fn process<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> BoxFuture<'a, HandlerResult>;
}

/// The remainder of the chain after the current stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn run<'b>(self, exchange: &'b mut Exchange) -> BoxFuture<'b, HandlerResult>
    where
        'a: 'b,
    {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.process(
                exchange,
                Next {
                    stages: rest,
                    handler: self.handler,
                },
            ),
            None => {
                let Exchange { request, context } = exchange;
                self.handler.call(request, context)
            }
        }
    }
}

/// Settings shared by the standard stages.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub service: String,
    pub correlation_header: HeaderName,
    pub request_timeout: Duration,
}

/// Ordered stage chain wrapping every inbound request.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    correlation_header: HeaderName,
}

impl Pipeline {
    /// Standard chain: correlation → logging → timing → error handling.
    pub fn new(settings: PipelineSettings, metrics: &MetricsRegistry) -> Self {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(CorrelationStage::new(settings.correlation_header.clone())),
            Arc::new(LoggingStage::new(settings.service)),
            Arc::new(TimingStage::new(metrics)),
            Arc::new(ErrorStage::new(metrics, settings.request_timeout)),
        ];
        Self::with_stages(stages, settings.correlation_header)
    }

    pub fn with_stages(stages: Vec<Arc<dyn Stage>>, correlation_header: HeaderName) -> Self {
        Self {
            stages,
            correlation_header,
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run `handler` for `request` under the given operation name.
    pub async fn handle(
        &self,
        request: InboundRequest,
        operation: &str,
        handler: &dyn Handler,
    ) -> Response {
        // Seeded with a generated id so even a failing correlation stage
        // leaves something traceable.
        let context = RequestContext::new(
            CorrelationId::generate(),
            operation,
            request.method.clone(),
            request.path.clone(),
        );
        let mut exchange = Exchange { request, context };

        let next = Next {
            stages: &self.stages,
            handler,
        };
        let result = next.run(&mut exchange).await;

        let mut reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(
                    correlation_id = %exchange.context.correlation_id(),
                    operation,
                    error = %err,
                    "failure escaped the pipeline stages"
                );
                envelope::failure_reply(&err, exchange.context.correlation_id())
            }
        };

        if !reply.headers().contains_key(&self.correlation_header) {
            stages::attach_correlation(
                &mut reply,
                &self.correlation_header,
                exchange.context.correlation_id(),
            );
        }
        reply.into_response()
    }
}
