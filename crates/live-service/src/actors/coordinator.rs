//! `CoordinatorActor` - singleton supervisor for session actors.
//!
//! - Singleton per service instance
//! - Resolves the actor for a session, spawning one on demand
//! - Replaces actors that have closed their mailbox or exited
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Reaps finished actors and detects panics via `JoinHandle`
//!
//! # Graceful Shutdown
//!
//! On shutdown the coordinator:
//! 1. Stops handing out session actors
//! 2. Cancels the root token (propagates to every session actor)
//! 3. Waits, up to a deadline, for each actor to drain its mailbox

use super::messages::{CoordinatorMessage, CoordinatorStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{SessionActor, SessionActorHandle};
use crate::errors::LiveError;
use crate::observability::metrics;
use crate::repositories::SessionStore;
use common::types::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 1000;

/// How often finished session actors are reaped.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Drain bound used when the root token is cancelled directly.
const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Handle to the `CoordinatorActor`.
#[derive(Clone)]
pub struct CoordinatorActorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl CoordinatorActorHandle {
    /// Spawn the coordinator and return a handle to it.
    ///
    /// # Arguments
    ///
    /// * `instance_id` - service instance id, used in logs
    /// * `store` - session store shared by every session actor
    /// * `idle_timeout` - how long a session actor lives without messages
    #[must_use]
    pub fn new(
        instance_id: String,
        store: Arc<dyn SessionStore>,
        idle_timeout: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Coordinator, &instance_id));

        let actor = CoordinatorActor {
            instance_id,
            receiver,
            cancel_token: cancel_token.clone(),
            store,
            idle_timeout,
            sessions: HashMap::new(),
            accepting_new: true,
            metrics: ActorMetrics::new(),
            mailbox: Arc::clone(&mailbox),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    async fn send(&self, message: CoordinatorMessage) -> Result<(), LiveError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|_| {
            self.mailbox.record_send_failed();
            LiveError::ServiceUnavailable("session coordinator is not running".to_string())
        })
    }

    /// Resolve a live actor for `session_id`.
    pub async fn session_actor(
        &self,
        session_id: SessionId,
    ) -> Result<SessionActorHandle, LiveError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::GetSessionActor {
            session_id,
            respond_to: tx,
        })
        .await?;

        // A dropped responder means the coordinator stopped after accepting.
        rx.await.map_err(|_| {
            LiveError::ServiceUnavailable("session coordinator stopped".to_string())
        })?
    }

    /// Get the current coordinator status.
    pub async fn get_status(&self) -> Result<CoordinatorStatus, LiveError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting work and wait for session actors to drain.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), LiveError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::Shutdown {
            deadline,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the coordinator and every session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Internal state for a supervised session actor.
struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
    created_at: Instant,
}

impl ManagedSession {
    fn is_usable(&self) -> bool {
        !self.handle.is_closed() && !self.task_handle.is_finished()
    }
}

/// The `CoordinatorActor` implementation.
pub struct CoordinatorActor {
    instance_id: String,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    cancel_token: CancellationToken,
    store: Arc<dyn SessionStore>,
    idle_timeout: Duration,
    sessions: HashMap<SessionId, ManagedSession>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl CoordinatorActor {
    #[instrument(skip_all, name = "live.actor.coordinator", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "live.actor.coordinator",
            instance_id = %self.instance_id,
            "CoordinatorActor started"
        );

        let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "live.actor.coordinator",
                        instance_id = %self.instance_id,
                        "CoordinatorActor received cancellation signal"
                    );
                    self.graceful_shutdown(DEFAULT_DRAIN_DEADLINE).await;
                    break;
                }

                _ = health_check.tick() => {
                    self.check_session_health().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let stop = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            if stop {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "live.actor.coordinator",
                                instance_id = %self.instance_id,
                                "CoordinatorActor channel closed, exiting"
                            );
                            self.graceful_shutdown(DEFAULT_DRAIN_DEADLINE).await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "live.actor.coordinator",
            instance_id = %self.instance_id,
            messages_processed = self.mailbox.messages_processed(),
            "CoordinatorActor stopped"
        );
    }

    /// Handle one message. Returns `true` when the actor should stop.
    async fn handle_message(&mut self, message: CoordinatorMessage) -> bool {
        match message {
            CoordinatorMessage::GetSessionActor {
                session_id,
                respond_to,
            } => {
                let result = self.get_session_actor(session_id).await;
                let _ = respond_to.send(result);
                false
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                self.check_session_health().await;
                let _ = respond_to.send(self.get_status());
                false
            }

            CoordinatorMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.graceful_shutdown(deadline).await;
                let _ = respond_to.send(Ok(()));
                true
            }
        }
    }

    /// Return the running actor for a session, or spawn a replacement.
    async fn get_session_actor(
        &mut self,
        session_id: SessionId,
    ) -> Result<SessionActorHandle, LiveError> {
        if !self.accepting_new {
            return Err(LiveError::ServiceUnavailable(
                "service is shutting down".to_string(),
            ));
        }

        if let Some(managed) = self.sessions.get(&session_id) {
            if managed.is_usable() {
                return Ok(managed.handle.clone());
            }
        }

        // A closed-but-running predecessor is still draining; the replacement
        // waits for it so the session never has two actors applying changes.
        let predecessor = match self.sessions.remove(&session_id) {
            Some(old) if old.task_handle.is_finished() => {
                self.reap(session_id, old.task_handle).await;
                None
            }
            Some(old) => Some(old.task_handle),
            None => None,
        };

        let (handle, task_handle) = SessionActor::spawn(
            session_id,
            self.cancel_token.child_token(),
            Arc::clone(&self.store),
            self.idle_timeout,
            Arc::clone(&self.metrics),
            predecessor,
        );

        self.sessions.insert(
            session_id,
            ManagedSession {
                handle: handle.clone(),
                task_handle,
                created_at: Instant::now(),
            },
        );

        debug!(
            target: "live.actor.coordinator",
            instance_id = %self.instance_id,
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session actor spawned"
        );

        Ok(handle)
    }

    fn get_status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            session_actor_count: self.sessions.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    async fn graceful_shutdown(&mut self, deadline: Duration) {
        info!(
            target: "live.actor.coordinator",
            instance_id = %self.instance_id,
            session_count = self.sessions.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;
        self.cancel_token.cancel();

        let deadline = Instant::now() + deadline;
        for (session_id, managed) in self.sessions.drain() {
            match tokio::time::timeout_at(deadline, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "live.actor.coordinator",
                        instance_id = %self.instance_id,
                        session_id = %session_id,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "live.actor.coordinator",
                        instance_id = %self.instance_id,
                        session_id = %session_id,
                        "Session actor shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "live.actor.coordinator",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop finished actors from the table.
    async fn check_session_health(&mut self) {
        let finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for session_id in finished {
            if let Some(managed) = self.sessions.remove(&session_id) {
                debug!(
                    target: "live.actor.coordinator",
                    session_id = %session_id,
                    lifetime_secs = managed.created_at.elapsed().as_secs(),
                    "Reaping session actor"
                );
                self.reap(session_id, managed.task_handle).await;
            }
        }

        let deepest = self
            .sessions
            .values()
            .map(|m| m.handle.mailbox_depth())
            .max()
            .unwrap_or(0);
        metrics::set_actor_mailbox_depth(ActorType::Session.as_str(), deepest);
        metrics::set_actor_mailbox_depth(
            ActorType::Coordinator.as_str(),
            self.mailbox.current_depth(),
        );
    }

    /// Await a finished actor task and record a panic if it died abnormally.
    async fn reap(&self, session_id: SessionId, task_handle: JoinHandle<()>) {
        if let Err(join_error) = task_handle.await {
            if join_error.is_panic() {
                error!(
                    target: "live.actor.coordinator",
                    instance_id = %self.instance_id,
                    session_id = %session_id,
                    error = ?join_error,
                    "Session actor panicked"
                );
                self.metrics.record_panic(ActorType::Session);
                self.metrics.session_actor_stopped();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::JoinAuthority;
    use crate::actors::session::SessionCallError;
    use crate::models::{JoinOutcome, NewSession, SourceType};
    use crate::repositories::InMemorySessionStore;
    use common::types::UserId;

    const IDLE: Duration = Duration::from_secs(300);

    async fn setup() -> (CoordinatorActorHandle, SessionId) {
        let store = Arc::new(InMemorySessionStore::new());
        let session = store
            .create_session(NewSession {
                host_id: UserId(1),
                host_display_name: "host".to_string(),
                name: "Coordinator Room".to_string(),
                source_type: SourceType::Track,
                source_id: "6rqhFgbbKwnb9MLmUQDhG6".to_string(),
                is_public: true,
            })
            .await
            .unwrap();
        let handle = CoordinatorActorHandle::new("live-test".to_string(), store, IDLE);
        (handle, session.id)
    }

    #[tokio::test]
    async fn test_same_actor_for_same_session() {
        let (coordinator, id) = setup().await;

        let a = coordinator.session_actor(id).await.unwrap();
        let b = coordinator.session_actor(id).await.unwrap();
        assert_eq!(a.session_id(), id);
        assert_eq!(b.session_id(), id);

        let status = coordinator.get_status().await.unwrap();
        assert_eq!(status.session_actor_count, 1);
        assert!(!status.is_draining);

        coordinator.cancel();
    }

    #[tokio::test]
    async fn test_distinct_sessions_get_distinct_actors() {
        let (coordinator, id) = setup().await;
        coordinator.session_actor(id).await.unwrap();
        coordinator.session_actor(SessionId::new()).await.unwrap();

        let status = coordinator.get_status().await.unwrap();
        assert!(status.session_actor_count >= 1);

        coordinator.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_actor_is_replaced() {
        let (coordinator, id) = setup().await;

        let first = coordinator.session_actor(id).await.unwrap();
        first
            .join(UserId(2), "b".to_string(), JoinAuthority::Open)
            .await
            .unwrap();

        tokio::time::advance(IDLE + Duration::from_secs(1)).await;
        for _ in 0..10 {
            if first.is_closed() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            first.join(UserId(3), "c".to_string(), JoinAuthority::Open).await,
            Err(SessionCallError::MailboxClosed)
        ));

        let second = coordinator.session_actor(id).await.unwrap();
        assert!(!second.is_closed());
        assert_eq!(
            second
                .join(UserId(3), "c".to_string(), JoinAuthority::Open)
                .await
                .unwrap(),
            JoinOutcome::Joined
        );

        coordinator.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let (coordinator, id) = setup().await;
        coordinator.session_actor(id).await.unwrap();

        coordinator.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(coordinator.is_cancelled());

        let err = coordinator.session_actor(id).await.unwrap_err();
        assert!(matches!(err, LiveError::ServiceUnavailable(_)));
    }
}
