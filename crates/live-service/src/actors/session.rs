//! `SessionActor` - serializes every state transition of one session.
//!
//! Joins, leaves, ends and visibility changes for a session are handled one
//! at a time by its actor, so the liveness check, the invite check and the
//! membership write of a join can never interleave with the zero-count flip
//! of a leave or with a host's end.
//!
//! # Lifecycle
//!
//! - Spawned on demand by the coordinator.
//! - Exits when idle for the configured period, on cancellation, or once it
//!   has observed its session absent or inactive.
//! - Before exiting it closes its mailbox and handles everything already
//!   queued; senders that arrive later see a closed mailbox and go back to
//!   the coordinator for a fresh actor.
//! - A replacement actor waits for its predecessor to finish draining before
//!   it handles its own first message.

use super::messages::{JoinAuthority, SessionMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::LiveError;
use crate::invites::CapabilityError;
use crate::models::{EndOutcome, JoinOutcome, LeaveOutcome, Session};
use crate::observability::metrics;
use crate::repositories::SessionStore;
use crate::services::policy::require_host;
use chrono::Utc;
use common::types::{SessionId, UserId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for a session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 256;

/// How long a replacement waits for its predecessor to drain.
const PREDECESSOR_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure of a call through a [`SessionActorHandle`].
#[derive(Debug, Error)]
pub enum SessionCallError {
    /// The actor had already closed its mailbox; the message was not delivered.
    #[error("session actor mailbox closed")]
    MailboxClosed,

    /// The actor handled the message and rejected it.
    #[error(transparent)]
    Rejected(#[from] LiveError),
}

/// Handle to a `SessionActor`.
#[derive(Debug, Clone)]
pub struct SessionActorHandle {
    session_id: SessionId,
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionActorHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Whether the actor has stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox.current_depth()
    }

    /// Cancel the actor. It still drains what is queued.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, LiveError>>) -> SessionMessage,
    ) -> Result<T, SessionCallError> {
        let (tx, rx) = oneshot::channel();

        self.mailbox.record_enqueue();
        if self.sender.send(build(tx)).await.is_err() {
            self.mailbox.record_send_failed();
            return Err(SessionCallError::MailboxClosed);
        }

        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
            .map_err(SessionCallError::Rejected)
    }

    pub async fn join(
        &self,
        user_id: UserId,
        display_name: String,
        authority: JoinAuthority,
    ) -> Result<JoinOutcome, SessionCallError> {
        self.call(|respond_to| SessionMessage::Join {
            user_id,
            display_name,
            authority,
            respond_to,
        })
        .await
    }

    pub async fn leave(&self, user_id: UserId) -> Result<LeaveOutcome, SessionCallError> {
        self.call(|respond_to| SessionMessage::Leave {
            user_id,
            respond_to,
        })
        .await
    }

    pub async fn end(&self, user_id: UserId) -> Result<EndOutcome, SessionCallError> {
        self.call(|respond_to| SessionMessage::End {
            user_id,
            respond_to,
        })
        .await
    }

    pub async fn set_visibility(
        &self,
        user_id: UserId,
        is_public: bool,
    ) -> Result<Session, SessionCallError> {
        self.call(|respond_to| SessionMessage::SetVisibility {
            user_id,
            is_public,
            respond_to,
        })
        .await
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: SessionId,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    store: Arc<dyn SessionStore>,
    idle_timeout: Duration,
    mailbox: Arc<MailboxMonitor>,
    metrics: Arc<ActorMetrics>,
    /// Task of the actor this one replaces, if it may still be draining.
    predecessor: Option<JoinHandle<()>>,
    /// Set once the session is known to be gone or inactive.
    retire: bool,
}

impl SessionActor {
    /// Spawn an actor for `session_id`.
    pub fn spawn(
        session_id: SessionId,
        cancel_token: CancellationToken,
        store: Arc<dyn SessionStore>,
        idle_timeout: Duration,
        metrics: Arc<ActorMetrics>,
        predecessor: Option<JoinHandle<()>>,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Session,
            session_id.to_string(),
        ));

        let actor = Self {
            session_id,
            receiver,
            cancel_token: cancel_token.clone(),
            store,
            idle_timeout,
            mailbox: Arc::clone(&mailbox),
            metrics,
            predecessor,
            retire: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            session_id,
            sender,
            cancel_token,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "live.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        self.metrics.session_actor_started();
        debug!(
            target: "live.actor.session",
            session_id = %self.session_id,
            "SessionActor started"
        );

        if let Some(predecessor) = self.predecessor.take() {
            self.await_predecessor(predecessor).await;
        }

        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        let reason = loop {
            if self.retire {
                break "session_closed";
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => break "cancelled",

                () = &mut idle => break "idle",

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            idle.as_mut().reset(tokio::time::Instant::now() + self.idle_timeout);
                        }
                        None => break "channel_closed",
                    }
                }
            }
        };

        self.drain(reason).await;
        self.metrics.session_actor_stopped();

        debug!(
            target: "live.actor.session",
            session_id = %self.session_id,
            reason,
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    async fn await_predecessor(&self, predecessor: JoinHandle<()>) {
        match tokio::time::timeout(PREDECESSOR_DRAIN_TIMEOUT, predecessor).await {
            Ok(Ok(())) => {}
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    self.metrics.record_panic(ActorType::Session);
                    self.metrics.session_actor_stopped();
                }
            }
            Err(_) => {
                warn!(
                    target: "live.actor.session",
                    session_id = %self.session_id,
                    "Previous session actor did not drain in time"
                );
            }
        }
    }

    /// Close the mailbox and handle whatever was already queued.
    async fn drain(&mut self, reason: &'static str) {
        self.receiver.close();

        let mut drained = 0usize;
        while let Some(message) = self.receiver.recv().await {
            self.handle_message(message).await;
            self.mailbox.record_dequeue();
            self.metrics.record_message_processed();
            drained += 1;
        }

        if drained > 0 {
            debug!(
                target: "live.actor.session",
                session_id = %self.session_id,
                reason,
                drained,
                "Drained session mailbox"
            );
        }
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join {
                user_id,
                display_name,
                authority,
                respond_to,
            } => {
                let result = self.join(user_id, &display_name, authority).await;
                metrics::record_join(
                    authority.path(),
                    match &result {
                        Ok(JoinOutcome::Joined) => "joined",
                        Ok(JoinOutcome::AlreadyMember) => "already_member",
                        Err(e) => e.code(),
                    },
                );
                let _ = respond_to.send(result);
            }

            SessionMessage::Leave {
                user_id,
                respond_to,
            } => {
                let result = self.leave(user_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::End {
                user_id,
                respond_to,
            } => {
                let result = self.end(user_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::SetVisibility {
                user_id,
                is_public,
                respond_to,
            } => {
                let result = self.set_visibility(user_id, is_public).await;
                let _ = respond_to.send(result);
            }
        }
    }

    async fn load_session(&mut self) -> Result<Session, LiveError> {
        match self.store.get_session(self.session_id).await? {
            Some(session) => Ok(session),
            None => {
                self.retire = true;
                Err(LiveError::session_not_found())
            }
        }
    }

    async fn is_member(&self, user_id: UserId) -> Result<bool, LiveError> {
        let members = self.store.members_of(&[self.session_id]).await?;
        Ok(members
            .get(&self.session_id)
            .is_some_and(|roster| roster.iter().any(|m| m.user_id == user_id)))
    }

    async fn join(
        &mut self,
        user_id: UserId,
        display_name: &str,
        authority: JoinAuthority,
    ) -> Result<JoinOutcome, LiveError> {
        let session = self.load_session().await?;

        if !session.is_active {
            self.retire = true;
            if matches!(authority, JoinAuthority::Invite(_)) {
                let err = CapabilityError::SessionEnded;
                metrics::record_invite_verification(err.outcome());
                return Err(err.into());
            }
            return Err(LiveError::session_inactive());
        }

        // A presented invite must name this session, whatever its visibility.
        if let JoinAuthority::Invite(capability) = authority {
            capability
                .check_usable_for(self.session_id, Utc::now())
                .inspect_err(|e| metrics::record_invite_verification(e.outcome()))?;
        } else if !session.is_public
            && !session.is_host(user_id)
            && !self.is_member(user_id).await?
        {
            return Err(LiveError::Forbidden(
                "This session is private; an invite is required".to_string(),
            ));
        }

        let outcome = self
            .store
            .add_member(self.session_id, user_id, display_name)
            .await?;

        if outcome == JoinOutcome::Joined {
            info!(
                target: "live.actor.session",
                session_id = %self.session_id,
                user_id = %user_id,
                path = authority.path(),
                "User joined session"
            );
        }

        Ok(outcome)
    }

    async fn leave(&mut self, user_id: UserId) -> Result<LeaveOutcome, LiveError> {
        let outcome = match self.store.remove_member(self.session_id, user_id).await {
            Ok(outcome) => outcome,
            Err(LiveError::NotFound(message)) => {
                // Retires the actor if the session itself is missing.
                self.load_session().await?;
                return Err(LiveError::NotFound(message));
            }
            Err(e) => return Err(e),
        };

        match outcome {
            LeaveOutcome::LeftAndEnded => {
                metrics::record_session_transition("ended_empty");
                info!(
                    target: "live.actor.session",
                    session_id = %self.session_id,
                    user_id = %user_id,
                    "Last member left; session ended"
                );
                self.retire = true;
            }
            LeaveOutcome::LeftInactive => self.retire = true,
            LeaveOutcome::Left => {
                debug!(
                    target: "live.actor.session",
                    session_id = %self.session_id,
                    user_id = %user_id,
                    "User left session"
                );
            }
        }

        Ok(outcome)
    }

    async fn end(&mut self, user_id: UserId) -> Result<EndOutcome, LiveError> {
        let session = self.load_session().await?;
        require_host(&session, user_id, "end this session")?;

        let outcome = self.store.deactivate(self.session_id).await?;
        if outcome == EndOutcome::Ended {
            metrics::record_session_transition("ended_by_host");
            info!(
                target: "live.actor.session",
                session_id = %self.session_id,
                "Host ended session"
            );
        }
        self.retire = true;

        Ok(outcome)
    }

    async fn set_visibility(
        &mut self,
        user_id: UserId,
        is_public: bool,
    ) -> Result<Session, LiveError> {
        let session = self.load_session().await?;
        require_host(&session, user_id, "change session visibility")?;

        if !session.is_active {
            self.retire = true;
            return Err(LiveError::session_inactive());
        }
        if session.is_public == is_public {
            return Ok(session);
        }

        let updated = self.store.set_visibility(self.session_id, is_public).await?;
        info!(
            target: "live.actor.session",
            session_id = %self.session_id,
            is_public,
            "Session visibility changed"
        );
        Ok(updated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::invites::{InviteCapability, InviteIssuer, InviteVerifier};
    use crate::models::{NewSession, SourceType};
    use crate::repositories::InMemorySessionStore;

    const IDLE: Duration = Duration::from_secs(300);

    async fn setup(is_public: bool) -> (Arc<InMemorySessionStore>, Session) {
        let store = Arc::new(InMemorySessionStore::new());
        let session = store
            .create_session(NewSession {
                host_id: UserId(1),
                host_display_name: "host".to_string(),
                name: "Listening Room".to_string(),
                source_type: SourceType::Playlist,
                source_id: "7".to_string(),
                is_public,
            })
            .await
            .unwrap();
        (store, session)
    }

    fn spawn(store: &Arc<InMemorySessionStore>, id: SessionId) -> (SessionActorHandle, JoinHandle<()>) {
        SessionActor::spawn(
            id,
            CancellationToken::new(),
            Arc::clone(store) as Arc<dyn SessionStore>,
            IDLE,
            ActorMetrics::new(),
            None,
        )
    }

    fn rejection(result: Result<impl std::fmt::Debug, SessionCallError>) -> LiveError {
        match result {
            Err(SessionCallError::Rejected(e)) => e,
            other => LiveError::Internal(format!("unexpected: {other:?}")),
        }
    }

    fn capability_for(id: SessionId) -> InviteCapability {
        let secret = b"session-actor-test-secret-000000";
        let token = InviteIssuer::new(secret).issue(id, 60).unwrap().token;
        InviteVerifier::new(secret).verify(&token).unwrap()
    }

    #[tokio::test]
    async fn test_join_public_and_rejoin() {
        let (store, session) = setup(true).await;
        let (handle, _task) = spawn(&store, session.id);

        let first = handle.join(UserId(2), "b".to_string(), JoinAuthority::Open).await;
        assert_eq!(first.unwrap(), JoinOutcome::Joined);
        let second = handle.join(UserId(2), "b".to_string(), JoinAuthority::Open).await;
        assert_eq!(second.unwrap(), JoinOutcome::AlreadyMember);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_private_join_requires_invite() {
        let (store, session) = setup(false).await;
        let (handle, _task) = spawn(&store, session.id);

        let err = rejection(handle.join(UserId(2), "b".to_string(), JoinAuthority::Open).await);
        assert!(matches!(err, LiveError::Forbidden(_)));

        let with_invite = handle
            .join(
                UserId(2),
                "b".to_string(),
                JoinAuthority::Invite(capability_for(session.id)),
            )
            .await;
        assert_eq!(with_invite.unwrap(), JoinOutcome::Joined);

        // Host never needs an invite; an existing member may re-join without one.
        assert!(handle.join(UserId(1), "host".to_string(), JoinAuthority::Open).await.is_ok());
        assert_eq!(
            handle.join(UserId(2), "b".to_string(), JoinAuthority::Open).await.unwrap(),
            JoinOutcome::AlreadyMember
        );

        handle.cancel();
    }

    #[tokio::test]
    async fn test_invite_for_other_session_is_forbidden() {
        let (store, session) = setup(false).await;
        let (handle, _task) = spawn(&store, session.id);

        let err = rejection(
            handle
                .join(
                    UserId(2),
                    "b".to_string(),
                    JoinAuthority::Invite(capability_for(SessionId::new())),
                )
                .await,
        );
        assert!(matches!(err, LiveError::Forbidden(msg) if msg.contains("not valid for this session")));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_end_is_host_only_and_retires_actor() {
        let (store, session) = setup(true).await;
        let (handle, task) = spawn(&store, session.id);
        handle.join(UserId(2), "b".to_string(), JoinAuthority::Open).await.unwrap();

        let err = rejection(handle.end(UserId(2)).await);
        assert!(matches!(err, LiveError::Forbidden(_)));

        assert_eq!(handle.end(UserId(1)).await.unwrap(), EndOutcome::Ended);

        // The actor exits once the session is over.
        task.await.unwrap();
        assert!(handle.is_closed());
        assert!(matches!(
            handle.end(UserId(1)).await,
            Err(SessionCallError::MailboxClosed)
        ));
    }

    #[tokio::test]
    async fn test_set_visibility_rules() {
        let (store, session) = setup(false).await;
        let (handle, _task) = spawn(&store, session.id);

        let err = rejection(handle.set_visibility(UserId(9), true).await);
        assert!(matches!(err, LiveError::Forbidden(_)));

        let updated = handle.set_visibility(UserId(1), true).await.unwrap();
        assert!(updated.is_public);
        let unchanged = handle.set_visibility(UserId(1), true).await.unwrap();
        assert!(unchanged.is_public);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let store = Arc::new(InMemorySessionStore::new());
        let (handle, task) = spawn(&store, SessionId::new());

        let err = rejection(handle.join(UserId(2), "b".to_string(), JoinAuthority::Open).await);
        assert!(matches!(err, LiveError::NotFound(_)));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_unknown_session_retires_actor() {
        let store = Arc::new(InMemorySessionStore::new());
        let (handle, task) = spawn(&store, SessionId::new());

        let err = rejection(handle.leave(UserId(2)).await);
        assert!(matches!(err, LiveError::NotFound(_)));
        task.await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_leave_as_non_member_keeps_actor() {
        let (store, session) = setup(true).await;
        let (handle, task) = spawn(&store, session.id);

        let err = rejection(handle.leave(UserId(9)).await);
        assert!(matches!(err, LiveError::NotFound(msg) if msg.contains("not a member")));
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_invite_for_other_session_is_forbidden_on_public_session() {
        let (store, session) = setup(true).await;
        let (handle, _task) = spawn(&store, session.id);

        let err = rejection(
            handle
                .join(
                    UserId(2),
                    "b".to_string(),
                    JoinAuthority::Invite(capability_for(SessionId::new())),
                )
                .await,
        );
        assert!(matches!(err, LiveError::Forbidden(_)));
        assert_eq!(
            handle.join(UserId(2), "b".to_string(), JoinAuthority::Open).await.unwrap(),
            JoinOutcome::Joined
        );

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_actor_exits_after_idle_period() {
        let (store, session) = setup(true).await;
        let (handle, task) = spawn(&store, session.id);
        handle.join(UserId(2), "b".to_string(), JoinAuthority::Open).await.unwrap();

        tokio::time::advance(IDLE - Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        // Activity resets the idle timer.
        handle.join(UserId(3), "c".to_string(), JoinAuthority::Open).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        tokio::time::advance(IDLE).await;
        task.await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_queued_messages_are_handled_after_cancel() {
        let (store, session) = setup(true).await;
        let (handle, task) = spawn(&store, session.id);

        let joins: Vec<_> = (2..6)
            .map(|id| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle
                        .join(UserId(id), format!("user{id}"), JoinAuthority::Open)
                        .await
                })
            })
            .collect();
        tokio::task::yield_now().await;
        handle.cancel();

        for join in joins {
            let result = join.await.unwrap();
            assert!(
                matches!(result, Ok(JoinOutcome::Joined) | Err(SessionCallError::MailboxClosed)),
                "a delivered message is never dropped: {result:?}"
            );
        }
        task.await.unwrap();
    }
}
