//! Session lifecycle service.
//!
//! Entry point for every state transition. Creation goes straight to the
//! store; everything that mutates an existing session is routed through that
//! session's actor so transitions on one session never interleave.
//!
//! Invite tokens are verified here, before the actor is involved, since
//! verification is pure computation. Whether the session is still live is
//! left to the actor, at the moment of the join.

use crate::actors::{CoordinatorActorHandle, JoinAuthority, SessionActorHandle, SessionCallError};
use crate::auth::AuthenticatedUser;
use crate::config::Config;
use crate::errors::LiveError;
use crate::invites::{IssuedInvite, InviteIssuer, InviteVerifier};
use crate::models::{CreateSessionRequest, EndOutcome, JoinOutcome, LeaveOutcome, Session};
use crate::observability::metrics;
use crate::repositories::SessionStore;
use crate::services::policy::require_host;
use crate::services::source_catalog::SourceCatalog;
use common::types::{SessionId, UserId};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Attempts made to reach a session actor before giving up with 503.
pub const MAX_ACTOR_ATTEMPTS: usize = 3;

/// Bounds on invite lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteTtlPolicy {
    pub default_seconds: u64,
    pub max_seconds: u64,
}

impl InviteTtlPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_seconds: config.invite_default_ttl_seconds,
            max_seconds: config.invite_max_ttl_seconds,
        }
    }

    /// Lifetime to mint with: the default when none is requested, otherwise
    /// the request clamped to the maximum.
    ///
    /// # Errors
    ///
    /// `Validation` when the requested lifetime is zero or negative.
    pub fn resolve(&self, requested: Option<i64>) -> Result<u64, LiveError> {
        match requested {
            None => Ok(self.default_seconds.min(self.max_seconds)),
            Some(ttl) if ttl <= 0 => Err(LiveError::Validation(
                "ttl_seconds must be positive".to_string(),
            )),
            Some(ttl) => Ok(u64::try_from(ttl)
                .unwrap_or(self.max_seconds)
                .min(self.max_seconds)),
        }
    }
}

/// The session lifecycle coordinator.
#[derive(Clone)]
pub struct LiveSessionService {
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn SourceCatalog>,
    coordinator: CoordinatorActorHandle,
    issuer: Arc<InviteIssuer>,
    verifier: Arc<InviteVerifier>,
    invite_ttl: InviteTtlPolicy,
}

impl LiveSessionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn SourceCatalog>,
        coordinator: CoordinatorActorHandle,
        invite_secret: &[u8],
        invite_ttl: InviteTtlPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            coordinator,
            issuer: Arc::new(InviteIssuer::new(invite_secret)),
            verifier: Arc::new(InviteVerifier::new(invite_secret)),
            invite_ttl,
        }
    }

    pub fn coordinator(&self) -> &CoordinatorActorHandle {
        &self.coordinator
    }

    /// Create an active session with the caller as host and first member.
    ///
    /// # Errors
    ///
    /// `Validation` for missing or malformed fields, or when the source check fails.
    #[instrument(skip_all, name = "live.service.create_session", fields(host_id = %host.user_id))]
    pub async fn create_session(
        &self,
        host: &AuthenticatedUser,
        request: &CreateSessionRequest,
    ) -> Result<Session, LiveError> {
        let new = request
            .validate(host.user_id, &host.display_name)
            .map_err(LiveError::Validation)?;

        self.catalog
            .check(new.host_id, new.source_type, &new.source_id)
            .await?;

        let session = self.store.create_session(new).await?;
        metrics::record_session_transition("created");

        info!(
            target: "live.service",
            session_id = %session.id,
            host_id = %session.host_id,
            source_type = %session.source_type,
            is_public = session.is_public,
            "Session created"
        );

        Ok(session)
    }

    /// Join by session id. Public sessions need nothing more; a private one
    /// needs `invite_token` unless the caller is its host or already a member.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden` (inactive, private without a usable invite),
    /// `CapabilityExpired`, or `ServiceUnavailable`.
    #[instrument(skip_all, name = "live.service.join_public", fields(session_id = %session_id, user_id = %user.user_id))]
    pub async fn join_public(
        &self,
        session_id: SessionId,
        user: &AuthenticatedUser,
        invite_token: Option<&str>,
    ) -> Result<JoinOutcome, LiveError> {
        let authority = match invite_token {
            Some(token) => JoinAuthority::Invite(self.verifier.verify(token)?),
            None => JoinAuthority::Open,
        };
        self.join(session_id, user, authority).await
    }

    /// Redeem an invite. The session is the one the invite names.
    ///
    /// # Errors
    ///
    /// `Forbidden` for an invalid invite or an ended session,
    /// `CapabilityExpired` for an expired one.
    #[instrument(skip_all, name = "live.service.join_by_invite", fields(user_id = %user.user_id))]
    pub async fn join_by_invite(
        &self,
        token: &str,
        user: &AuthenticatedUser,
    ) -> Result<SessionId, LiveError> {
        let capability = self.verifier.verify(token)?;
        self.join(capability.session_id, user, JoinAuthority::Invite(capability))
            .await?;
        Ok(capability.session_id)
    }

    async fn join(
        &self,
        session_id: SessionId,
        user: &AuthenticatedUser,
        authority: JoinAuthority,
    ) -> Result<JoinOutcome, LiveError> {
        let user_id = user.user_id;
        let display_name = user.display_name.clone();

        self.with_session_actor(session_id, move |actor| {
            let display_name = display_name.clone();
            async move { actor.join(user_id, display_name, authority).await }
        })
        .await
    }

    /// Leave a session. Also the path for implicit leave on disconnect.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session or when the caller is not a member.
    #[instrument(skip_all, name = "live.service.leave", fields(session_id = %session_id, user_id = %user_id))]
    pub async fn leave(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<LeaveOutcome, LiveError> {
        self.with_session_actor(session_id, move |actor| async move {
            actor.leave(user_id).await
        })
        .await
    }

    /// Host-only force end. Ending twice reports `AlreadyInactive`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, `Forbidden` for a non-host.
    #[instrument(skip_all, name = "live.service.end_session", fields(session_id = %session_id, user_id = %user_id))]
    pub async fn end_session(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> Result<EndOutcome, LiveError> {
        self.with_session_actor(session_id, move |actor| async move {
            actor.end(user_id).await
        })
        .await
    }

    /// Host-only visibility toggle on an active session.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `Forbidden` for a non-host or an ended session.
    #[instrument(skip_all, name = "live.service.set_visibility", fields(session_id = %session_id, user_id = %user_id))]
    pub async fn set_visibility(
        &self,
        session_id: SessionId,
        user_id: UserId,
        is_public: bool,
    ) -> Result<Session, LiveError> {
        self.with_session_actor(session_id, move |actor| async move {
            actor.set_visibility(user_id, is_public).await
        })
        .await
    }

    /// Mint an invite for an active session the caller hosts.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden` (non-host or inactive session), or `Validation`
    /// for a non-positive `ttl_seconds`.
    #[instrument(skip_all, name = "live.service.issue_invite", fields(session_id = %session_id, user_id = %user_id))]
    pub async fn issue_invite(
        &self,
        session_id: SessionId,
        user_id: UserId,
        ttl_seconds: Option<i64>,
    ) -> Result<IssuedInvite, LiveError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(LiveError::session_not_found)?;

        require_host(&session, user_id, "invite listeners")?;
        if !session.is_active {
            return Err(LiveError::session_inactive());
        }

        let ttl = self.invite_ttl.resolve(ttl_seconds)?;
        let invite = self.issuer.issue(session_id, ttl)?;
        metrics::record_invite_issued();

        info!(
            target: "live.invites",
            session_id = %session_id,
            ttl_seconds = ttl,
            expires_at = %invite.capability.expires_at,
            "Invite issued"
        );

        Ok(invite)
    }

    /// Run `op` against the session's actor, resolving a fresh actor when the
    /// one handed out has already closed its mailbox.
    async fn with_session_actor<T, F, Fut>(
        &self,
        session_id: SessionId,
        op: F,
    ) -> Result<T, LiveError>
    where
        F: Fn(SessionActorHandle) -> Fut,
        Fut: Future<Output = Result<T, SessionCallError>>,
    {
        for attempt in 1..=MAX_ACTOR_ATTEMPTS {
            let actor = self.coordinator.session_actor(session_id).await?;
            match op(actor).await {
                Ok(value) => return Ok(value),
                Err(SessionCallError::Rejected(err)) => return Err(err),
                Err(SessionCallError::MailboxClosed) => {
                    debug!(
                        target: "live.service",
                        session_id = %session_id,
                        attempt,
                        "Session actor closed its mailbox, retrying"
                    );
                }
            }
        }

        Err(LiveError::ServiceUnavailable(
            "session actor unavailable".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_policy_resolve() {
        let policy = InviteTtlPolicy {
            default_seconds: 1800,
            max_seconds: 86_400,
        };

        assert_eq!(policy.resolve(None).unwrap(), 1800);
        assert_eq!(policy.resolve(Some(60)).unwrap(), 60);
        assert_eq!(policy.resolve(Some(1_000_000)).unwrap(), 86_400);
        assert!(matches!(policy.resolve(Some(0)), Err(LiveError::Validation(_))));
        assert!(matches!(policy.resolve(Some(-5)), Err(LiveError::Validation(_))));
    }

    #[test]
    fn test_ttl_policy_default_never_exceeds_max() {
        let policy = InviteTtlPolicy {
            default_seconds: 600,
            max_seconds: 300,
        };
        assert_eq!(policy.resolve(None).unwrap(), 300);
    }
}
