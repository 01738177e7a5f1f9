//! Live session handlers.
//!
//! - `POST /api/v1/live/sessions` - Create session
//! - `GET /api/v1/live/sessions/public` - Active public sessions
//! - `GET /api/v1/live/sessions/me` - Active sessions the caller is in
//! - `GET /api/v1/live/sessions/hosted` - Sessions the caller has hosted
//! - `GET /api/v1/live/sessions/:id` - One session with its participants
//! - `POST /api/v1/live/sessions/:id/invites` - Issue invite (host only)
//! - `POST /api/v1/live/invites/:token/join` - Join through an invite
//! - `POST /api/v1/live/sessions/:id/join` - Join by id
//! - `POST /api/v1/live/sessions/:id/leave` - Leave
//! - `PATCH /api/v1/live/sessions/:id/end` - End session (host only)
//! - `PATCH /api/v1/live/sessions/:id/visibility` - Change visibility (host only)
//!
//! All routes sit behind `require_user_auth`. Invite tokens are never logged.

use crate::auth::AuthenticatedUser;
use crate::errors::LiveError;
use crate::models::{
    CreateSessionRequest, InviteResponse, IssueInviteRequest, JoinByInviteResponse,
    JoinSessionRequest, LeaveResponse, LeaveOutcome, MessageResponse, SessionResponse,
    SessionView, SetVisibilityRequest,
};
use crate::routes::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::SessionId;
use std::sync::Arc;
use tracing::{info, instrument};

fn parse_session_id(raw: &str) -> Result<SessionId, LiveError> {
    raw.parse()
        .map_err(|_| LiveError::Validation("Invalid session id".to_string()))
}

/// An optional JSON body: absent when the request carries no JSON content
/// type, a validation error when it is present but malformed.
fn optional_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<Option<T>, LiveError> {
    match body {
        Ok(Json(value)) => Ok(Some(value)),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(None),
        Err(rejection) => Err(LiveError::Validation(rejection.body_text())),
    }
}

/// Handler for POST /api/v1/live/sessions
///
/// # Response
///
/// - 201 Created: `{ "session": Session }`
/// - 400 Bad Request: Missing field or unknown source
#[instrument(skip_all, name = "live.handlers.create_session", fields(user_id = %user.user_id))]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), LiveError> {
    let session = state.service.create_session(&user, &request).await?;
    Ok((StatusCode::CREATED, Json(SessionResponse { session })))
}

/// Handler for GET /api/v1/live/sessions/public
#[instrument(skip_all, name = "live.handlers.list_public_sessions")]
pub async fn list_public_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionView>>, LiveError> {
    Ok(Json(state.directory.list_public_active().await?))
}

/// Handler for GET /api/v1/live/sessions/me
#[instrument(skip_all, name = "live.handlers.list_my_sessions", fields(user_id = %user.user_id))]
pub async fn list_my_sessions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<SessionView>>, LiveError> {
    Ok(Json(state.directory.list_for_user(user.user_id).await?))
}

/// Handler for GET /api/v1/live/sessions/hosted
#[instrument(skip_all, name = "live.handlers.list_hosted_sessions", fields(user_id = %user.user_id))]
pub async fn list_hosted_sessions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<SessionView>>, LiveError> {
    Ok(Json(state.directory.list_by_host(user.user_id).await?))
}

/// Handler for GET /api/v1/live/sessions/:id
///
/// # Response
///
/// - 200 OK: `SessionView`
/// - 403 Forbidden: Private session the caller is not part of
/// - 404 Not Found: Unknown session
#[instrument(skip_all, name = "live.handlers.get_session", fields(session_id = %id, user_id = %user.user_id))]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, LiveError> {
    let session_id = parse_session_id(&id)?;
    Ok(Json(
        state.directory.get_session(session_id, user.user_id).await?,
    ))
}

/// Handler for POST /api/v1/live/sessions/:id/invites
///
/// # Response
///
/// - 201 Created: `{ "token", "session_id", "expires_at" }`
/// - 403 Forbidden: Caller is not the host, or the session has ended
/// - 404 Not Found: Unknown session
#[instrument(skip_all, name = "live.handlers.issue_invite", fields(session_id = %id, user_id = %user.user_id))]
pub async fn issue_invite(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    body: Result<Json<IssueInviteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InviteResponse>), LiveError> {
    let session_id = parse_session_id(&id)?;
    let ttl_seconds = optional_body(body)?.and_then(|req| req.ttl_seconds);

    let invite = state
        .service
        .issue_invite(session_id, user.user_id, ttl_seconds)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            token: invite.token,
            session_id: invite.capability.session_id,
            expires_at: invite.capability.expires_at,
        }),
    ))
}

/// Handler for POST /api/v1/live/invites/:token/join
///
/// # Response
///
/// - 200 OK: `{ "session_id", "user_id" }`
/// - 403 Forbidden: Invalid invite, or the session has ended
/// - 410 Gone: Expired invite
#[instrument(skip_all, name = "live.handlers.join_by_invite", fields(user_id = %user.user_id))]
pub async fn join_by_invite(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(token): Path<String>,
) -> Result<Json<JoinByInviteResponse>, LiveError> {
    let session_id = state.service.join_by_invite(&token, &user).await?;

    info!(
        target: "live.handlers",
        session_id = %session_id,
        user_id = %user.user_id,
        "User joined session through invite"
    );

    Ok(Json(JoinByInviteResponse {
        session_id,
        user_id: user.user_id,
    }))
}

/// Handler for POST /api/v1/live/sessions/:id/join
///
/// Private sessions need `invite_token` in the body unless the caller is
/// already a member.
///
/// # Response
///
/// - 200 OK: `{ "message": "<display name> joined session" }`
/// - 403 Forbidden: Ended session, or private without a usable invite
/// - 404 Not Found: Unknown session
/// - 410 Gone: Expired invite
#[instrument(skip_all, name = "live.handlers.join_session", fields(session_id = %id, user_id = %user.user_id))]
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    body: Result<Json<JoinSessionRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, LiveError> {
    let session_id = parse_session_id(&id)?;
    let invite_token = optional_body(body)?.and_then(|req| req.invite_token);

    state
        .service
        .join_public(session_id, &user, invite_token.as_deref())
        .await?;

    Ok(Json(MessageResponse {
        message: format!("{} joined session", user.display_name),
    }))
}

/// Handler for POST /api/v1/live/sessions/:id/leave
///
/// # Response
///
/// - 200 OK: `{ "message", "session_ended" }`
/// - 404 Not Found: Unknown session, or caller is not a member
#[instrument(skip_all, name = "live.handlers.leave_session", fields(session_id = %id, user_id = %user.user_id))]
pub async fn leave_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<LeaveResponse>, LiveError> {
    let session_id = parse_session_id(&id)?;
    let outcome = state.service.leave(session_id, user.user_id).await?;

    let message = match outcome {
        LeaveOutcome::LeftAndEnded => "Left session. It had no listeners left and has ended.",
        LeaveOutcome::Left | LeaveOutcome::LeftInactive => "Left session successfully.",
    };

    Ok(Json(LeaveResponse {
        message: message.to_string(),
        session_ended: outcome.ended_session(),
    }))
}

/// Handler for PATCH /api/v1/live/sessions/:id/end
///
/// # Response
///
/// - 200 OK: `{ "message" }`, also when the session had already ended
/// - 403 Forbidden: Caller is not the host
/// - 404 Not Found: Unknown session
#[instrument(skip_all, name = "live.handlers.end_session", fields(session_id = %id, user_id = %user.user_id))]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, LiveError> {
    let session_id = parse_session_id(&id)?;
    let outcome = state.service.end_session(session_id, user.user_id).await?;

    Ok(Json(MessageResponse {
        message: outcome.message().to_string(),
    }))
}

/// Handler for PATCH /api/v1/live/sessions/:id/visibility
///
/// # Response
///
/// - 200 OK: `{ "session": Session }`
/// - 400 Bad Request: `is_public` missing
/// - 403 Forbidden: Caller is not the host, or the session has ended
/// - 404 Not Found: Unknown session
#[instrument(skip_all, name = "live.handlers.set_visibility", fields(session_id = %id, user_id = %user.user_id))]
pub async fn set_visibility(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(request): Json<SetVisibilityRequest>,
) -> Result<Json<SessionResponse>, LiveError> {
    let session_id = parse_session_id(&id)?;
    let is_public = request
        .is_public
        .ok_or_else(|| LiveError::Validation("is_public is required".to_string()))?;

    let session = state
        .service
        .set_visibility(session_id, user.user_id, is_public)
        .await?;

    Ok(Json(SessionResponse { session }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_id() {
        let id = SessionId::new();
        assert_eq!(parse_session_id(&id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_session_id("not-a-session"),
            Err(LiveError::Validation(_))
        ));
    }
}
