//! Live service models.
//!
//! Domain records for sessions and memberships, plus the request and
//! response bodies of the HTTP surface.

use chrono::{DateTime, Utc};
use common::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum session name length in bytes, after trimming.
pub const MAX_SESSION_NAME_LENGTH: usize = 255;

/// Maximum source reference length in bytes.
pub const MAX_SOURCE_ID_LENGTH: usize = 255;

/// Kind of catalogue entity a session plays from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Playlist,
    Track,
    Album,
}

impl SourceType {
    /// Returns the string stored in the `source_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Playlist => "playlist",
            SourceType::Track => "track",
            SourceType::Album => "album",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "playlist" => Ok(SourceType::Playlist),
            "track" => Ok(SourceType::Track),
            "album" => Ok(SourceType::Album),
            other => Err(format!(
                "source_type must be one of playlist, track, album; got '{other}'"
            )),
        }
    }
}

/// A live listening session.
///
/// `is_active` only ever moves from `true` to `false`; `ended_at` is set in
/// the same write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub host_id: UserId,
    pub host_display_name: String,
    pub name: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub is_public: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    /// The one host check every host-only transition goes through.
    pub fn is_host(&self, user_id: UserId) -> bool {
        self.host_id == user_id
    }
}

/// A user currently in a session (or, for ended sessions, its final roster).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

/// A session together with its participants, as returned by read paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub participants: Vec<Participant>,
}

impl SessionView {
    /// Whether `user_id` currently holds a membership in this session.
    pub fn has_member(&self, user_id: UserId) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }
}

/// Validated input for creating a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub host_id: UserId,
    pub host_display_name: String,
    pub name: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub is_public: bool,
}

/// Result of adding a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new membership was recorded.
    Joined,
    /// The user was already a member; nothing changed.
    AlreadyMember,
}

/// Result of removing a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Membership removed, others remain.
    Left,
    /// Membership removed and it was the last one; the session is now inactive.
    LeftAndEnded,
    /// Membership removed from a session that had already ended.
    LeftInactive,
}

impl LeaveOutcome {
    /// Whether this leave performed the Active -> Inactive transition.
    pub fn ended_session(&self) -> bool {
        matches!(self, LeaveOutcome::LeftAndEnded)
    }
}

/// Result of a host ending a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Ended,
    AlreadyInactive,
}

impl EndOutcome {
    /// Message reported to the caller.
    pub fn message(&self) -> &'static str {
        match self {
            EndOutcome::Ended => "Session ended successfully.",
            EndOutcome::AlreadyInactive => "Session is already inactive.",
        }
    }
}

// ============================================================================
// Request / response bodies
// ============================================================================

/// Request body for `POST /api/v1/live/sessions`.
///
/// Every field is optional at the JSON layer so that a missing field comes
/// back as a validation error rather than a body rejection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

impl CreateSessionRequest {
    /// Validate the request and bind it to the host.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing or malformed field.
    pub fn validate(
        &self,
        host_id: UserId,
        host_display_name: &str,
    ) -> Result<NewSession, String> {
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| "name is required".to_string())?;
        if name.len() > MAX_SESSION_NAME_LENGTH {
            return Err(format!(
                "name must be at most {MAX_SESSION_NAME_LENGTH} bytes"
            ));
        }

        let source_type: SourceType = self
            .source_type
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "source_type is required".to_string())?
            .parse()?;

        let source_id = self
            .source_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "source_id is required".to_string())?;
        if source_id.len() > MAX_SOURCE_ID_LENGTH {
            return Err(format!(
                "source_id must be at most {MAX_SOURCE_ID_LENGTH} bytes"
            ));
        }

        Ok(NewSession {
            host_id,
            host_display_name: host_display_name.to_string(),
            name: name.to_string(),
            source_type,
            source_id: source_id.to_string(),
            is_public: self.is_public.unwrap_or(false),
        })
    }
}

/// Response body for session creation and visibility changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session: Session,
}

/// Request body for `POST /api/v1/live/sessions/:id/invites`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IssueInviteRequest {
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

/// Response body for invite issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteResponse {
    pub token: String,
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
}

/// Request body for `POST /api/v1/live/sessions/:id/join`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JoinSessionRequest {
    /// Invite for a private session, when the caller already holds one.
    #[serde(default)]
    pub invite_token: Option<String>,
}

/// Response body for joining through an invite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinByInviteResponse {
    pub session_id: SessionId,
    pub user_id: UserId,
}

/// Request body for `PATCH /api/v1/live/sessions/:id/visibility`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SetVisibilityRequest {
    #[serde(default)]
    pub is_public: Option<bool>,
}

/// Generic `{ "message": ... }` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Response body for leaving a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub message: String,
    /// True when this leave closed the session.
    pub session_ended: bool,
}

/// Readiness check response.
///
/// Returned by the `/ready` endpoint (readiness probe).
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    /// Service readiness status ("ready" or "not_ready").
    pub status: &'static str,

    /// Session store connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,

    /// Session actor supervisor status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<&'static str>,

    /// Error message (generic, no infrastructure details).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
