//! Handler capability and the request/reply types it exchanges.

use std::any::Any;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::correlation::RequestContext;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<Reply, HandlerError>;

/// Business endpoint invoked at the innermost pipeline stage.
pub trait Handler: Send + Sync {
    fn call<'a>(
        &'a self,
        request: &'a InboundRequest,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// Failure classes a handler (or the pipeline itself) can report.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Client sent something malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A peer call failed; `status` is the peer's status when it answered.
    #[error("{peer} unavailable: {reason}")]
    DownstreamUnavailable {
        peer: String,
        status: Option<u16>,
        reason: String,
    },

    /// The request deadline elapsed before the handler finished.
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("unexpected failure: {0}")]
    Unexpected(#[source] BoxError),
}

impl HandlerError {
    pub fn unexpected(err: impl Into<BoxError>) -> Self {
        HandlerError::Unexpected(err.into())
    }

    /// Convert a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        HandlerError::unexpected(format!("panic: {message}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Validation(_) => ErrorKind::Validation,
            HandlerError::NotFound(_) => ErrorKind::NotFound,
            HandlerError::DownstreamUnavailable { .. } => ErrorKind::DownstreamUnavailable,
            HandlerError::Timeout(_) => ErrorKind::Timeout,
            HandlerError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// HTTP status sent to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::Validation(_) => StatusCode::BAD_REQUEST,
            HandlerError::NotFound(_) => StatusCode::NOT_FOUND,
            HandlerError::DownstreamUnavailable { status: Some(_), .. } => StatusCode::BAD_GATEWAY,
            HandlerError::DownstreamUnavailable { status: None, .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            HandlerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HandlerError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Label values for the error counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    DownstreamUnavailable,
    Timeout,
    Unexpected,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DownstreamUnavailable => "downstream_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unexpected => "unexpected",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Domain failures get a structured body instead of an envelope.
    pub fn is_domain(&self) -> bool {
        matches!(self, ErrorKind::Validation | ErrorKind::NotFound)
    }
}

/// Inbound request as seen by stages and handlers.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Path parameters captured by the route pattern.
    pub params: BTreeMap<String, String>,
}

impl InboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Parse a path parameter, reporting a validation failure when malformed.
    pub fn param_as<T: FromStr>(&self, name: &str) -> Result<T, HandlerError> {
        let raw = self
            .param(name)
            .ok_or_else(|| HandlerError::Validation(format!("missing path parameter '{name}'")))?;
        raw.parse()
            .map_err(|_| HandlerError::Validation(format!("invalid {name} '{raw}'")))
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HandlerError::Validation(format!("malformed JSON body: {e}")))
    }
}

/// Response produced by a handler or by the error-handling stage.
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut reply = Self::new(status, body.into());
        reply.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        reply
    }

    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> HandlerResult {
        let body = serde_json::to_vec(value).map_err(HandlerError::unexpected)?;
        let mut reply = Self::new(status, body);
        reply.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(reply)
    }

    pub fn ok<T: Serialize>(value: &T) -> HandlerResult {
        Self::json(StatusCode::OK, value)
    }

    /// 201 with a `Location` header.
    pub fn created<T: Serialize>(location: &str, value: &T) -> HandlerResult {
        let mut reply = Self::json(StatusCode::CREATED, value)?;
        let location = HeaderValue::from_str(location).map_err(HandlerError::unexpected)?;
        reply.headers.insert(header::LOCATION, location);
        Ok(reply)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Answers every request with 404; used when no route matched.
#[derive(Debug, Default)]
pub struct NoRouteHandler;

impl Handler for NoRouteHandler {
    fn call<'a>(
        &'a self,
        request: &'a InboundRequest,
        _ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, HandlerResult> {
        let message = format!("no route for {} {}", request.method, request.path);
        Box::pin(async move { Err(HandlerError::NotFound(message)) })
    }
}

/// Rejects a request whose body could not be read.
#[derive(Debug)]
pub struct RejectedBodyHandler {
    pub limit: usize,
}

impl Handler for RejectedBodyHandler {
    fn call<'a>(
        &'a self,
        _request: &'a InboundRequest,
        _ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, HandlerResult> {
        let limit = self.limit;
        Box::pin(async move {
            Err(HandlerError::Validation(format!(
                "request body unreadable or larger than {limit} bytes"
            )))
        })
    }
}
