//! Service middleware for metrics and request tracking.
//!
//! ## Metrics Exposed
//!
//! - request counts by path, method, and status
//! - request latency
//! - mutation outcomes (created/renamed/archived/deleted branches)

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

/// Metrics middleware that records request counts and latency.
///
/// Uses tracing for now - can be upgraded to prometheus metrics later.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "branch_kernel::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

/// Normalize path for metrics to avoid high cardinality.
///
/// Replaces UUIDs (branch and message ids) with an `:id` placeholder.
fn normalize_path(path: &str) -> String {
    let uuid_regex = regex_lite::Regex::new(
        r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
    )
    .unwrap();

    uuid_regex.replace_all(path, ":id").to_string()
}

/// Record the outcome of a branch mutation.
///
/// Call this after create/rename/archive/delete to track mutation rates.
pub fn record_mutation(operation: &str, success: bool) {
    let result = if success { "success" } else { "noop" };
    info!(
        target: "branch_kernel::metrics",
        metric_type = "mutation",
        operation = operation,
        result = result,
        "mutation_metric"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_replaces_uuid() {
        let path = "/api/conversations/550e8400-e29b-41d4-a716-446655440000/tree";
        let normalized = normalize_path(path);
        assert_eq!(normalized, "/api/conversations/:id/tree");
    }

    #[test]
    fn test_normalize_path_preserves_regular_path() {
        let path = "/health/ready";
        let normalized = normalize_path(path);
        assert_eq!(normalized, "/health/ready");
    }
}
