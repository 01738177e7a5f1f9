//! HTTP routes for the live service.
//!
//! Defines the Axum router and application state.

use crate::actors::CoordinatorActorHandle;
use crate::auth::IdentityVerifier;
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_user_auth, AuthState};
use crate::repositories::SessionStore;
use crate::services::{InviteTtlPolicy, LiveSessionService, SessionDirectory, SourceCatalog};
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Session lifecycle transitions.
    pub service: LiveSessionService,

    /// Session read paths.
    pub directory: SessionDirectory,

    /// Session store, for readiness.
    pub store: Arc<dyn SessionStore>,

    /// Session actor supervisor.
    pub coordinator: CoordinatorActorHandle,
}

impl AppState {
    /// Wire the service layer over `store` and `catalog`, starting the
    /// session actor supervisor.
    pub fn new(
        config: Config,
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn SourceCatalog>,
    ) -> Self {
        let coordinator = CoordinatorActorHandle::new(
            config.instance_id.clone(),
            Arc::clone(&store),
            Duration::from_secs(config.session_actor_idle_seconds),
        );

        let service = LiveSessionService::new(
            Arc::clone(&store),
            catalog,
            coordinator.clone(),
            config.invite_key(),
            InviteTtlPolicy::from_config(&config),
        );

        Self {
            directory: SessionDirectory::new(Arc::clone(&store)),
            config,
            service,
            store,
            coordinator,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health`, `/ready`, `/metrics` - public, unversioned
/// - `/api/v1/live/...` - session endpoints, requires an identity assertion
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let verifier = Arc::new(IdentityVerifier::new(
        state.config.auth_key(),
        state.config.jwt_clock_skew_seconds,
    ));
    let auth_state = Arc::new(AuthState { verifier });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Static segments win over `:id` in axum's router.
    let protected_routes = Router::new()
        .route("/api/v1/live/sessions", post(handlers::create_session))
        .route(
            "/api/v1/live/sessions/public",
            get(handlers::list_public_sessions),
        )
        .route("/api/v1/live/sessions/me", get(handlers::list_my_sessions))
        .route(
            "/api/v1/live/sessions/hosted",
            get(handlers::list_hosted_sessions),
        )
        .route("/api/v1/live/sessions/:id", get(handlers::get_session))
        .route(
            "/api/v1/live/sessions/:id/invites",
            post(handlers::issue_invite),
        )
        .route("/api/v1/live/sessions/:id/join", post(handlers::join_session))
        .route(
            "/api/v1/live/sessions/:id/leave",
            post(handlers::leave_session),
        )
        .route("/api/v1/live/sessions/:id/end", patch(handlers::end_session))
        .route(
            "/api/v1/live/sessions/:id/visibility",
            patch(handlers::set_visibility),
        )
        .route(
            "/api/v1/live/invites/:token/join",
            post(handlers::join_by_invite),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_user_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
