//! Prometheus metrics endpoint handler.
//!
//! `/metrics` is unauthenticated so Prometheus can scrape it. Labels are
//! bounded and carry no user or session identifiers.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
#[tracing::instrument(skip_all, name = "live.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
