//! Metrics definitions for the Data API.
//!
//! All metrics follow Prometheus naming conventions:
//! - `data_api_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: 5 values (known paths plus `/other`)
//! - `status`: bounded by code (success, error, timeout, cached, ...)
//! - `outcome`: bounded by `AuthError::outcome()`
//! - `source`: bounded by credential source names
//!
//! No label ever carries a token, key id, email or subject.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("data_api_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Validation is local once keys are cached; the tail is JWKS fetches
        .set_buckets_for_metric(
            Matcher::Prefix("data_api_token_validation".to_string()),
            &[0.0005, 0.001, 0.002, 0.005, 0.010, 0.050, 0.250, 1.000, 5.000],
        )
        .map_err(|e| format!("Failed to set token validation buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("data_api_jwks_fetch".to_string()),
            &[0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("data_api_credential_acquisition".to_string()),
            &[0.001, 0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set credential acquisition buckets: {e}"))?
        // Connection attempts are bounded at 30s
        .set_buckets_for_metric(
            Matcher::Prefix("data_api_db_connection".to_string()),
            &[0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000],
        )
        .map_err(|e| format!("Failed to set DB connection buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `data_api_http_requests_total`, `data_api_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// Captures framework-level responses too (404, 405, 415).
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("data_api_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("data_api_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion.
///
/// The Data API has no parameterized routes, so anything unknown is `/other`.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/api/health" => "/api/health",
        "/api/test-db" => "/api/test-db",
        "/api/upload" => "/api/upload",
        "/metrics" => "/metrics",
        _ => "/other",
    }
}

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record a bearer token validation.
///
/// Metric: `data_api_token_validations_total`, `data_api_token_validation_duration_seconds`
/// Labels: `outcome` ("success" or an `AuthError::outcome()` label)
pub fn record_token_validation(outcome: &str, duration: Duration) {
    histogram!("data_api_token_validation_duration_seconds").record(duration.as_secs_f64());

    counter!("data_api_token_validations_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a key-set document fetch.
///
/// Metric: `data_api_jwks_fetches_total`, `data_api_jwks_fetch_duration_seconds`
/// Labels: `status` ("success", "http_error", "parse_error", ...)
pub fn record_jwks_fetch(status: &str, duration: Duration) {
    histogram!("data_api_jwks_fetch_duration_seconds").record(duration.as_secs_f64());

    counter!("data_api_jwks_fetches_total",
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Identity Metrics
// ============================================================================

/// Record an access token acquisition by the identity broker.
///
/// Metric: `data_api_credential_acquisitions_total`,
/// `data_api_credential_acquisition_duration_seconds`
/// Labels: `source`, `status` ("success", "cached", "error")
pub fn record_credential_acquisition(source: &str, status: &str, duration: Duration) {
    histogram!("data_api_credential_acquisition_duration_seconds",
        "source" => source.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("data_api_credential_acquisitions_total",
        "source" => source.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record an authenticated connection attempt.
///
/// Metric: `data_api_db_connections_total`, `data_api_db_connection_duration_seconds`
/// Labels: `status` ("success" or a `ConnectError::kind()` label)
pub fn record_db_connection(status: &str, duration: Duration) {
    histogram!("data_api_db_connection_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("data_api_db_connections_total",
        "status" => status.to_string()
    )
    .increment(1);
}
