//! Metrics emitted by the auth service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `token_type`: 3 values (access, refresh, reset)
//! - `status`: success/error, or the rotation outcomes below
//! - `error_category`: see [`super::ErrorCategory`]

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder and return the handle that
/// renders `/metrics`.
///
/// # Errors
///
/// Returns error if a recorder is already installed in this process.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signing is sub-millisecond; key generation on the issuance path is
        // the slow tail
        .set_buckets_for_metric(
            Matcher::Prefix("auth_token_issuance".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set token issuance buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("auth_password".to_string()),
            &[0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("Failed to set password duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Token Metrics
// ============================================================================

/// Record token issuance duration and outcome
///
/// Metric: `auth_token_issuance_duration_seconds`, `auth_token_issuance_total`
/// Labels: `token_type`, `status`
pub fn record_token_issuance(token_type: &str, status: &str, duration: Duration) {
    histogram!("auth_token_issuance_duration_seconds", "token_type" => token_type.to_string(), "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("auth_token_issuance_total", "token_type" => token_type.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record token validation result
///
/// Metric: `auth_token_validations_total`
/// Labels: `status`, `error_category`
pub fn record_token_validation(status: &str, error_category: Option<&str>) {
    let category = error_category.unwrap_or("none");
    counter!("auth_token_validations_total", "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

/// Record an explicit token revocation
///
/// Metric: `auth_token_revocations_total`
pub fn record_token_revocation() {
    counter!("auth_token_revocations_total").increment(1);
}

/// Update the size of the in-memory revocation set
///
/// Metric: `auth_revoked_tokens`
pub fn set_revoked_tokens(count: usize) {
    gauge!("auth_revoked_tokens").set(count as f64);
}

// ============================================================================
// Key Management Metrics
// ============================================================================

/// Record key rotation pass outcome
///
/// Metric: `auth_key_rotation_total`
/// Labels: `status` (rotated, not_needed, no_active_key, error)
pub fn record_key_rotation(status: &str) {
    counter!("auth_key_rotation_total", "status" => status.to_string()).increment(1);
}

/// Update the number of keys the KeyManager holds
///
/// Metric: `auth_signing_keys_held`
pub fn set_signing_keys_held(count: usize) {
    gauge!("auth_signing_keys_held").set(count as f64);
}

/// Record key rotation last success timestamp
///
/// Metric: `auth_key_rotation_last_success_timestamp`
pub fn set_key_rotation_last_success(timestamp_secs: f64) {
    gauge!("auth_key_rotation_last_success_timestamp").set(timestamp_secs);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Record login attempt outcome
///
/// Metric: `auth_logins_total`
/// Labels: `status`
pub fn record_login(status: &str) {
    counter!("auth_logins_total", "status" => status.to_string()).increment(1);
}

/// Record password hash/verify duration
///
/// Metric: `auth_password_duration_seconds`
/// Labels: `operation` (hash, verify)
pub fn record_password_duration(operation: &str, duration: Duration) {
    histogram!("auth_password_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record JWKS endpoint request
///
/// Metric: `auth_jwks_requests_total`
pub fn record_jwks_request() {
    counter!("auth_jwks_requests_total").increment(1);
}
