//! HTTP metrics middleware.
//!
//! Records every response, including framework-level rejections that never
//! reach a handler (415 on a wrong Content-Type, 400/422 on a bad JSON body,
//! 404, 405).

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Middleware that records HTTP request metrics for all responses.
///
/// Applied as the outermost layer.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status_code = response.status().as_u16();
    record_http_request(&method, &path, status_code, start.elapsed());

    response
}
