//! Health check handlers.
//!
//! - `/health`: liveness, returns OK while the process is running
//! - `/ready`: readiness, checks the session store and the actor supervisor

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 503 when the store cannot be reached or the coordinator is
/// draining. Failure detail is logged, never returned.
#[tracing::instrument(skip_all, name = "live.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Err(e) = state.store.ping().await {
        tracing::warn!(target: "live.handlers", error = %e, "Readiness check failed: session store");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                database: Some("unhealthy"),
                coordinator: None,
                error: Some("Service dependencies unavailable".to_string()),
            }),
        );
    }

    let coordinator_ready = match state.coordinator.get_status().await {
        Ok(status) => !status.is_draining,
        Err(e) => {
            tracing::warn!(target: "live.handlers", error = %e, "Readiness check failed: coordinator");
            false
        }
    };

    if !coordinator_ready {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                database: Some("healthy"),
                coordinator: Some("unavailable"),
                error: Some("Service dependencies unavailable".to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            database: Some("healthy"),
            coordinator: Some("running"),
            error: None,
        }),
    )
}
