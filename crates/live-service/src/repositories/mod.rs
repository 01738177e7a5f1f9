//! Session and membership persistence.
//!
//! [`SessionStore`] is the only persistence seam. Every mutating operation
//! is atomic per session on its own: the Postgres implementation locks the
//! session row for the duration of a transaction, the in-memory one holds a
//! single mutex. The session actors add in-process serialization on top.

mod memory;
mod sessions;

pub use memory::InMemorySessionStore;
pub use sessions::PgSessionStore;

use crate::errors::LiveError;
use crate::models::{EndOutcome, JoinOutcome, LeaveOutcome, NewSession, Participant, Session};
use async_trait::async_trait;
use common::types::{SessionId, UserId};
use std::collections::HashMap;

/// Durable record of sessions and their memberships.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert an active session and its host as first member, atomically.
    async fn create_session(&self, new: NewSession) -> Result<Session, LiveError>;

    /// Fetch one session.
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, LiveError>;

    /// Add a member if the session is active.
    ///
    /// Errors with `NotFound` for an unknown session and `Forbidden` for an
    /// inactive one. An existing membership is left untouched.
    async fn add_member(
        &self,
        id: SessionId,
        user_id: UserId,
        display_name: &str,
    ) -> Result<JoinOutcome, LiveError>;

    /// Remove a member; if none remain, deactivate the session in the same unit.
    ///
    /// Errors with `NotFound` for an unknown session or a missing membership.
    async fn remove_member(&self, id: SessionId, user_id: UserId)
        -> Result<LeaveOutcome, LiveError>;

    /// Deactivate a session. Memberships are kept.
    async fn deactivate(&self, id: SessionId) -> Result<EndOutcome, LiveError>;

    /// Change visibility of an active session.
    async fn set_visibility(&self, id: SessionId, is_public: bool) -> Result<Session, LiveError>;

    /// Members of the given sessions, oldest membership first.
    async fn members_of(
        &self,
        ids: &[SessionId],
    ) -> Result<HashMap<SessionId, Vec<Participant>>, LiveError>;

    /// Public, active sessions, newest first.
    async fn list_public_active(&self) -> Result<Vec<Session>, LiveError>;

    /// Active sessions the user is currently in, newest first.
    async fn list_active_for_user(&self, user_id: UserId) -> Result<Vec<Session>, LiveError>;

    /// Every session the host created, newest first.
    async fn list_by_host(&self, host_id: UserId) -> Result<Vec<Session>, LiveError>;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), LiveError>;
}
