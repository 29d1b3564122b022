//! Correlation for the operational endpoints.
//! Health and metrics routes skip the pipeline but still echo an id.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Request},
    middleware::Next,
    response::Response,
};

use crate::correlation;

pub async fn correlation_middleware(
    State(header): State<HeaderName>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (id, source) = correlation::acquire(req.headers(), &header);
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;
    match id.to_header_value() {
        Ok(value) => {
            response.headers_mut().insert(header, value);
        }
        Err(e) => {
            tracing::warn!(path = %path, correlation_id = %id, error = %e, "Correlation id not encodable as header");
        }
    }

    tracing::debug!(
        path = %path,
        correlation_id = %id,
        id_source = source.as_str(),
        status = response.status().as_u16(),
        "Operational request served"
    );
    response
}
