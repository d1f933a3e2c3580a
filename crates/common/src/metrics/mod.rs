//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming conventions for the
//! upload, ingestion, and query paths.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all DocHarbor metrics
pub const METRICS_PREFIX: &str = "docharbor";

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Upload metrics
    describe_counter!(
        format!("{}_uploads_requested_total", METRICS_PREFIX),
        Unit::Count,
        "Total upload credentials issued"
    );

    describe_counter!(
        format!("{}_uploads_rejected_total", METRICS_PREFIX),
        Unit::Count,
        "Total upload requests rejected by validation"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_ingestion_jobs_total", METRICS_PREFIX),
        Unit::Count,
        "Total ingestion jobs by outcome"
    );

    describe_counter!(
        format!("{}_documents_indexed_total", METRICS_PREFIX),
        Unit::Count,
        "Total documents indexed"
    );

    describe_counter!(
        format!("{}_ingestion_deferrals_total", METRICS_PREFIX),
        Unit::Count,
        "Job starts deferred due to a running engine job"
    );

    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total answered queries"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Query latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record an upload-credential request
pub fn record_upload(accepted: bool, extension: &str) {
    if accepted {
        counter!(
            format!("{}_uploads_requested_total", METRICS_PREFIX),
            "type" => extension.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_uploads_rejected_total", METRICS_PREFIX),
            "type" => extension.to_string()
        )
        .increment(1);
    }
}

/// Record an ingestion job outcome
pub fn record_job_outcome(outcome: &str, documents: usize) {
    counter!(
        format!("{}_ingestion_jobs_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if outcome == "succeeded" {
        counter!(format!("{}_documents_indexed_total", METRICS_PREFIX)).increment(documents as u64);
    }
}

/// Record a deferred job start
pub fn record_deferral() {
    counter!(format!("{}_ingestion_deferrals_total", METRICS_PREFIX)).increment(1);
}

/// Record a completed query
pub fn record_query(duration_secs: f64, result_count: usize) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "degraded" => if result_count == 0 { "true" } else { "false" }
    )
    .increment(1);

    histogram!(format!("{}_query_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("GET", "/documents");
        std::thread::sleep(std::time::Duration::from_millis(5));
        metrics.finish(200);
        // Just verify it runs without panic
    }

    #[test]
    fn test_record_helpers() {
        record_upload(true, "pdf");
        record_upload(false, "exe");
        record_job_outcome("succeeded", 3);
        record_deferral();
        record_query(0.05, 5);
    }
}
