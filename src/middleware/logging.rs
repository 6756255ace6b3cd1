//! Request logging middleware (SPEC_FULL.md §4.L).
//!
//! Logs every HTTP request with method, path, client_id, status, and latency.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn, Instrument};

fn client_id_from_query(uri: &axum::http::Uri) -> String {
    uri.query()
        .and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("client_id="))
        })
        .unwrap_or("")
        .to_string()
}

/// Middleware that logs HTTP requests with timing information.
///
/// Logs at INFO level for successful requests, WARN level for errors.
/// Includes: method, path, client_id, status code, latency in milliseconds.
pub async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let client_id = client_id_from_query(&uri);

    // Skip logging for health checks to reduce noise
    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();

    // Create a span for this request
    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        client_id = %client_id,
        client_ip = %addr.ip(),
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    // Process the request. `instrument` enters the span only while the future
    // is polled, so it stays `Send` across the await -- unlike holding an
    // `Entered` guard over it.
    let response = next.run(request).instrument(span.clone()).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    // Record values in span
    span.record("status", status);
    span.record("latency_ms", latency.as_millis() as u64);

    // Log based on status code
    if status >= 500 {
        warn!(
            method = %method,
            path = %path,
            client_id = %client_id,
            status = status,
            latency_ms = latency.as_millis(),
            client_ip = %addr.ip(),
            "Request failed (5xx)"
        );
    } else if status >= 400 {
        info!(
            method = %method,
            path = %path,
            client_id = %client_id,
            status = status,
            latency_ms = latency.as_millis(),
            client_ip = %addr.ip(),
            "Request completed (4xx)"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            client_id = %client_id,
            status = status,
            latency_ms = latency.as_millis(),
            "Request completed"
        );
    }

    response
}
