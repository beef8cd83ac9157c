use std::time::Instant;

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::{error, info, warn};

use super::error::ErrorReport;

pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Tags the request with an id, logs it, and renders error envelopes with
/// the request path.
pub async fn request_context(request: Request, next: Next) -> Response {
    let rid = request_id(request.headers());
    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let report = response.extensions_mut().remove::<ErrorReport>();
    if let Some(report) = &report {
        *response.body_mut() = report.body(&path);
    }
    if let Ok(value) = HeaderValue::from_str(&rid) {
        response.headers_mut().insert(REQUEST_ID, value);
    }

    let status = response.status().as_u16();
    match report {
        Some(report) if report.status().is_server_error() => error!(
            request_id = %rid, %method, %path, status, elapsed_ms,
            "{}", report.message()
        ),
        Some(report) => warn!(
            request_id = %rid, %method, %path, status, elapsed_ms,
            "{}", report.message()
        ),
        None => info!(request_id = %rid, %method, %path, status, elapsed_ms, "request completed"),
    }
    response
}
