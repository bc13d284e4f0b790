//! HTTP metrics middleware.
//!
//! Records method, normalized path, status and duration for every response,
//! including framework-level rejections (404, 405, 415) and CORS preflights.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Applied as the outermost layer so every response is counted.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}
