//! Session read paths.
//!
//! Reads go straight to the store without touching session actors. A listing
//! may be a moment behind an in-flight transition but never shows a state
//! that was not committed.

use crate::errors::LiveError;
use crate::models::{Session, SessionView};
use crate::repositories::SessionStore;
use crate::services::policy::can_view;
use common::types::{SessionId, UserId};
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct SessionDirectory {
    store: Arc<dyn SessionStore>,
}

impl SessionDirectory {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Active public sessions, newest first.
    #[instrument(skip_all, name = "live.directory.list_public")]
    pub async fn list_public_active(&self) -> Result<Vec<SessionView>, LiveError> {
        let sessions = self.store.list_public_active().await?;
        self.with_participants(sessions).await
    }

    /// Active sessions `user_id` is currently a member of.
    #[instrument(skip_all, name = "live.directory.list_for_user", fields(user_id = %user_id))]
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<SessionView>, LiveError> {
        let sessions = self.store.list_active_for_user(user_id).await?;
        self.with_participants(sessions).await
    }

    /// Every session `host_id` has hosted, active or not.
    #[instrument(skip_all, name = "live.directory.list_by_host", fields(host_id = %host_id))]
    pub async fn list_by_host(&self, host_id: UserId) -> Result<Vec<SessionView>, LiveError> {
        let sessions = self.store.list_by_host(host_id).await?;
        self.with_participants(sessions).await
    }

    /// One session, if the caller may see it.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `Forbidden` for a private session the
    /// caller neither hosts nor belongs to.
    #[instrument(skip_all, name = "live.directory.get_session", fields(session_id = %id, user_id = %user_id))]
    pub async fn get_session(
        &self,
        id: SessionId,
        user_id: UserId,
    ) -> Result<SessionView, LiveError> {
        let session = self
            .store
            .get_session(id)
            .await?
            .ok_or_else(LiveError::session_not_found)?;

        let view = self
            .with_participants(vec![session])
            .await?
            .into_iter()
            .next()
            .ok_or_else(LiveError::session_not_found)?;

        if can_view(&view, user_id) {
            Ok(view)
        } else {
            Err(LiveError::Forbidden(
                "This session is private".to_string(),
            ))
        }
    }

    async fn with_participants(
        &self,
        sessions: Vec<Session>,
    ) -> Result<Vec<SessionView>, LiveError> {
        if sessions.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<SessionId> = sessions.iter().map(|s| s.id).collect();
        let mut members = self.store.members_of(&ids).await?;

        Ok(sessions
            .into_iter()
            .map(|session| {
                let participants = members.remove(&session.id).unwrap_or_default();
                SessionView {
                    session,
                    participants,
                }
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{NewSession, SourceType};
    use crate::repositories::InMemorySessionStore;

    fn new_session(host: i64, is_public: bool) -> NewSession {
        NewSession {
            host_id: UserId(host),
            host_display_name: format!("user{host}"),
            name: "room".to_string(),
            source_type: SourceType::Track,
            source_id: "t1".to_string(),
            is_public,
        }
    }

    #[tokio::test]
    async fn test_listings_attach_participants() {
        let store = Arc::new(InMemorySessionStore::new());
        let directory = SessionDirectory::new(store.clone());

        let public = store.create_session(new_session(1, true)).await.unwrap();
        store.create_session(new_session(2, false)).await.unwrap();
        store
            .add_member(public.id, UserId(5), "five")
            .await
            .unwrap();

        let listed = directory.list_public_active().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session.id, public.id);
        assert_eq!(listed[0].participants.len(), 2);

        let mine = directory.list_for_user(UserId(5)).await.unwrap();
        assert_eq!(mine.len(), 1);

        let hosted = directory.list_by_host(UserId(2)).await.unwrap();
        assert_eq!(hosted.len(), 1);
        assert!(!hosted[0].session.is_public);
    }

    #[tokio::test]
    async fn test_get_private_session_requires_membership() {
        let store = Arc::new(InMemorySessionStore::new());
        let directory = SessionDirectory::new(store.clone());
        let private = store.create_session(new_session(1, false)).await.unwrap();

        assert!(directory.get_session(private.id, UserId(1)).await.is_ok());
        assert!(matches!(
            directory.get_session(private.id, UserId(9)).await,
            Err(LiveError::Forbidden(_))
        ));
        assert!(matches!(
            directory.get_session(SessionId::new(), UserId(1)).await,
            Err(LiveError::NotFound(_))
        ));
    }
}
