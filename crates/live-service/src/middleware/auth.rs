//! Authentication middleware for protected routes.
//!
//! Extracts the Bearer token from the Authorization header, verifies it as an
//! identity assertion, and injects an [`AuthenticatedUser`] into request
//! extensions. Handlers read it with `Extension<AuthenticatedUser>`.

use crate::auth::{AuthenticatedUser, IdentityVerifier};
use crate::errors::LiveError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Identity assertion verifier.
    pub verifier: Arc<IdentityVerifier>,
}

/// Extract Bearer token from the Authorization header.
fn extract_bearer_token(req: &Request) -> Result<&str, LiveError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "live.middleware.auth", "Missing Authorization header");
            LiveError::InvalidToken("Missing Authorization header".to_string())
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "live.middleware.auth", "Invalid Authorization header format");
        LiveError::InvalidToken("Invalid Authorization header format".to_string())
    })
}

/// Authentication middleware for user identity tokens.
///
/// # Response
///
/// - 401 Unauthorized with WWW-Authenticate if the token is missing or invalid
/// - Otherwise continues with `AuthenticatedUser` in extensions
#[instrument(skip_all, name = "live.middleware.auth")]
pub async fn require_user_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, LiveError> {
    let token = extract_bearer_token(&req)?;
    let user: AuthenticatedUser = state.verifier.verify(token)?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use http_body_util::BodyExt;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use tower::ServiceExt;

    const SECRET: &[u8] = b"middleware-test-secret";

    async fn whoami(Extension(user): Extension<AuthenticatedUser>) -> String {
        format!("{}:{}", user.user_id, user.display_name)
    }

    fn app() -> Router {
        let auth_state = Arc::new(AuthState {
            verifier: Arc::new(IdentityVerifier::new(SECRET, 300)),
        });
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(auth_state, require_user_auth))
    }

    fn token(id: i64, username: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({"id": id, "username": username, "iat": chrono::Utc::now().timestamp()}),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("authorization", format!("Bearer {}", token(8, "rosa")))
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.to_vec(), b"8:rosa".to_vec());
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let request = HttpRequest::builder()
            .uri("/whoami")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_unauthorized() {
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("authorization", "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
