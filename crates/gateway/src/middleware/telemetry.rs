//! Per-request metrics
//!
//! Counts every routed request and records latency, labelled by method
//! and matched route template rather than the raw path (raw paths would
//! explode label cardinality on `/documents/{id}`).

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use docharbor_common::metrics::RequestMetrics;

pub async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let tracker = RequestMetrics::start(request.method().as_str(), &endpoint);
    let response = next.run(request).await;
    tracker.finish(response.status().as_u16());

    response
}
