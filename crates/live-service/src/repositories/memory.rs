//! In-memory [`SessionStore`].
//!
//! One mutex guards all sessions, so every operation is trivially atomic.
//! Used by tests and the HTTP test harness.

use super::SessionStore;
use crate::errors::LiveError;
use crate::models::{EndOutcome, JoinOutcome, LeaveOutcome, NewSession, Participant, Session};
use async_trait::async_trait;
use chrono::Utc;
use common::types::{SessionId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

struct StoredSession {
    session: Session,
    /// Insertion order; breaks `created_at` ties for newest-first listings.
    seq: u64,
    members: Vec<Participant>,
}

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<SessionId, StoredSession>,
    next_seq: u64,
}

/// In-memory session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `ping` fail, to exercise readiness handling.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, LiveError> {
        self.state
            .lock()
            .map_err(|_| LiveError::Internal("session store lock poisoned".to_string()))
    }

    fn newest_first(mut matched: Vec<(&StoredSession, u64)>) -> Vec<Session> {
        matched.sort_by(|(a, a_seq), (b, b_seq)| {
            b.session
                .created_at
                .cmp(&a.session.created_at)
                .then(b_seq.cmp(a_seq))
        });
        matched.into_iter().map(|(s, _)| s.session.clone()).collect()
    }

    fn list_where(&self, pred: impl Fn(&StoredSession) -> bool) -> Result<Vec<Session>, LiveError> {
        let state = self.state()?;
        let matched = state
            .sessions
            .values()
            .filter(|s| pred(s))
            .map(|s| (s, s.seq))
            .collect();
        Ok(Self::newest_first(matched))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, new: NewSession) -> Result<Session, LiveError> {
        let mut state = self.state()?;
        let now = Utc::now();

        let session = Session {
            id: SessionId::new(),
            host_id: new.host_id,
            host_display_name: new.host_display_name.clone(),
            name: new.name,
            source_type: new.source_type,
            source_id: new.source_id,
            is_public: new.is_public,
            is_active: true,
            created_at: now,
            ended_at: None,
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.sessions.insert(
            session.id,
            StoredSession {
                session: session.clone(),
                seq,
                members: vec![Participant {
                    user_id: new.host_id,
                    display_name: new.host_display_name,
                    joined_at: now,
                }],
            },
        );

        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, LiveError> {
        Ok(self.state()?.sessions.get(&id).map(|s| s.session.clone()))
    }

    async fn add_member(
        &self,
        id: SessionId,
        user_id: UserId,
        display_name: &str,
    ) -> Result<JoinOutcome, LiveError> {
        let mut state = self.state()?;
        let stored = state
            .sessions
            .get_mut(&id)
            .ok_or_else(LiveError::session_not_found)?;

        if !stored.session.is_active {
            return Err(LiveError::session_inactive());
        }
        if stored.members.iter().any(|m| m.user_id == user_id) {
            return Ok(JoinOutcome::AlreadyMember);
        }

        stored.members.push(Participant {
            user_id,
            display_name: display_name.to_string(),
            joined_at: Utc::now(),
        });
        Ok(JoinOutcome::Joined)
    }

    async fn remove_member(
        &self,
        id: SessionId,
        user_id: UserId,
    ) -> Result<LeaveOutcome, LiveError> {
        let mut state = self.state()?;
        let stored = state
            .sessions
            .get_mut(&id)
            .ok_or_else(LiveError::session_not_found)?;

        let before = stored.members.len();
        stored.members.retain(|m| m.user_id != user_id);
        if stored.members.len() == before {
            return Err(LiveError::NotFound(
                "You are not a member of this session".to_string(),
            ));
        }

        if !stored.session.is_active {
            return Ok(LeaveOutcome::LeftInactive);
        }
        if stored.members.is_empty() {
            stored.session.is_active = false;
            stored.session.ended_at = Some(Utc::now());
            return Ok(LeaveOutcome::LeftAndEnded);
        }
        Ok(LeaveOutcome::Left)
    }

    async fn deactivate(&self, id: SessionId) -> Result<EndOutcome, LiveError> {
        let mut state = self.state()?;
        let stored = state
            .sessions
            .get_mut(&id)
            .ok_or_else(LiveError::session_not_found)?;

        if !stored.session.is_active {
            return Ok(EndOutcome::AlreadyInactive);
        }
        stored.session.is_active = false;
        stored.session.ended_at = Some(Utc::now());
        Ok(EndOutcome::Ended)
    }

    async fn set_visibility(&self, id: SessionId, is_public: bool) -> Result<Session, LiveError> {
        let mut state = self.state()?;
        let stored = state
            .sessions
            .get_mut(&id)
            .ok_or_else(LiveError::session_not_found)?;

        if !stored.session.is_active {
            return Err(LiveError::session_inactive());
        }
        stored.session.is_public = is_public;
        Ok(stored.session.clone())
    }

    async fn members_of(
        &self,
        ids: &[SessionId],
    ) -> Result<HashMap<SessionId, Vec<Participant>>, LiveError> {
        let state = self.state()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.sessions.get(id).map(|s| (*id, s.members.clone())))
            .collect())
    }

    async fn list_public_active(&self) -> Result<Vec<Session>, LiveError> {
        self.list_where(|s| s.session.is_public && s.session.is_active)
    }

    async fn list_active_for_user(&self, user_id: UserId) -> Result<Vec<Session>, LiveError> {
        self.list_where(|s| {
            s.session.is_active && s.members.iter().any(|m| m.user_id == user_id)
        })
    }

    async fn list_by_host(&self, host_id: UserId) -> Result<Vec<Session>, LiveError> {
        self.list_where(|s| s.session.host_id == host_id)
    }

    async fn ping(&self) -> Result<(), LiveError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LiveError::Database("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}
