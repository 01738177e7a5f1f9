//! Metrics definitions for the live service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `live_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `endpoint`: parameterized paths, unknown paths collapse to `/other`
//! - `status`: success, error, timeout
//! - `transition`, `path`, `outcome`: fixed by code
//! - `operation`: one per store query

use metrics::{counter, gauge, histogram};
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
            Matcher::Prefix("live_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("live_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `live_http_requests_total`, `live_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("live_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("live_http_requests_total",
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

/// Normalize endpoint path to prevent label cardinality explosion
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" | "/health" | "/ready" | "/metrics" => path.to_string(),
        "/api/v1/live/sessions"
        | "/api/v1/live/sessions/public"
        | "/api/v1/live/sessions/me"
        | "/api/v1/live/sessions/hosted" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Normalize paths with dynamic segments.
///
/// Session ids and invite tokens are replaced with placeholders; tokens must
/// never end up in a label.
fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();

    // ["", "api", "v1", "live", "sessions", "{id}", action?]
    if path.starts_with("/api/v1/live/sessions/") {
        match (parts.len(), parts.get(6)) {
            (6, _) => return "/api/v1/live/sessions/{id}".to_string(),
            (7, Some(action))
                if matches!(*action, "invites" | "join" | "leave" | "end" | "visibility") =>
            {
                return format!("/api/v1/live/sessions/{{id}}/{action}");
            }
            _ => {}
        }
    }

    // ["", "api", "v1", "live", "invites", "{token}", "join"]
    if path.starts_with("/api/v1/live/invites/")
        && parts.len() == 7
        && parts.get(6) == Some(&"join")
    {
        return "/api/v1/live/invites/{token}/join".to_string();
    }

    "/other".to_string()
}

// ============================================================================
// Session Lifecycle Metrics
// ============================================================================

/// Record a session lifecycle transition.
///
/// Metric: `live_session_transitions_total`
/// Labels: `transition` (created, ended_by_host, ended_empty)
pub fn record_session_transition(transition: &'static str) {
    counter!("live_session_transitions_total", "transition" => transition).increment(1);
}

/// Record a join attempt.
///
/// Metric: `live_session_joins_total`
/// Labels: `path` (public, invite), `outcome` (joined, already_member, or an error code)
pub fn record_join(path: &'static str, outcome: &str) {
    counter!("live_session_joins_total",
        "path" => path,
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an issued invite.
///
/// Metric: `live_invites_issued_total`
pub fn record_invite_issued() {
    counter!("live_invites_issued_total").increment(1);
}

/// Record an invite verification result.
///
/// Metric: `live_invite_verifications_total`
/// Labels: `outcome` (valid, expired, invalid)
pub fn record_invite_verification(outcome: &'static str) {
    counter!("live_invite_verifications_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Set the number of live session actors.
///
/// Metric: `live_session_actors_active`
pub fn set_session_actors_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("live_session_actors_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `live_actor_mailbox_depth`
/// Labels: `actor_type` (coordinator, session)
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("live_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// Record an actor panic.
///
/// Metric: `live_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("live_actor_panics_total", "actor_type" => actor_type).increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution.
///
/// Metric: `live_db_query_duration_seconds`, `live_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("live_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("live_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed in unit tests; the macros fall back to a no-op
    // recorder, so these only prove the calls are well-formed.

    #[test]
    fn test_record_functions_do_not_panic() {
        record_http_request("GET", "/health", 200, Duration::from_millis(5));
        record_http_request("POST", "/api/v1/live/sessions", 201, Duration::from_millis(40));
        record_session_transition("created");
        record_join("invite", "joined");
        record_invite_issued();
        record_invite_verification("expired");
        set_session_actors_active(3);
        set_actor_mailbox_depth("session", 0);
        record_actor_panic("session");
        record_db_query("add_member", "success", Duration::from_millis(2));
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(201), "success");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(403), "error");
        assert_eq!(categorize_status_code(410), "error");
        assert_eq!(categorize_status_code(503), "error");
    }

    #[test]
    fn test_normalize_endpoint_static_paths() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/ready"), "/ready");
        assert_eq!(
            normalize_endpoint("/api/v1/live/sessions/public"),
            "/api/v1/live/sessions/public"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/live/sessions"),
            "/api/v1/live/sessions"
        );
    }

    #[test]
    fn test_normalize_endpoint_session_paths() {
        let id = "550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(
            normalize_endpoint(&format!("/api/v1/live/sessions/{id}")),
            "/api/v1/live/sessions/{id}"
        );
        for action in ["invites", "join", "leave", "end", "visibility"] {
            assert_eq!(
                normalize_endpoint(&format!("/api/v1/live/sessions/{id}/{action}")),
                format!("/api/v1/live/sessions/{{id}}/{action}")
            );
        }
    }

    #[test]
    fn test_normalize_endpoint_hides_invite_tokens() {
        let normalized = normalize_endpoint("/api/v1/live/invites/eyJhbGciOi.eyJzaWQiOi.sig/join");
        assert_eq!(normalized, "/api/v1/live/invites/{token}/join");
        assert!(!normalized.contains("eyJ"));
    }

    #[test]
    fn test_normalize_endpoint_unknown_paths() {
        assert_eq!(normalize_endpoint("/unknown"), "/other");
        assert_eq!(normalize_endpoint("/api/v1/live/sessions/x/unknown"), "/other");
        assert_eq!(normalize_endpoint("/api/v1/live/invites/abc"), "/other");
    }
}
