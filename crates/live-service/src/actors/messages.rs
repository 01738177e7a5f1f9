//! Message types for actor communication.
//!
//! Requests travel over `tokio::sync::mpsc`; replies come back on a
//! `tokio::sync::oneshot` carried in the message.

use super::session::SessionActorHandle;
use crate::errors::LiveError;
use crate::invites::InviteCapability;
use crate::models::{EndOutcome, JoinOutcome, LeaveOutcome, Session};
use common::types::{SessionId, UserId};
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to the `CoordinatorActor`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Resolve the actor for a session, spawning one if needed.
    GetSessionActor {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<SessionActorHandle, LiveError>>,
    },

    /// Current supervisor status (readiness, tests).
    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },

    /// Stop accepting work and drain every session actor.
    Shutdown {
        /// Upper bound on the drain.
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },
}

/// What lets a user into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAuthority {
    /// No invite presented; enough for public sessions and the host.
    Open,
    /// A verified invite, still to be checked against the session at use.
    Invite(InviteCapability),
}

impl JoinAuthority {
    /// Metric label for the join path.
    pub fn path(&self) -> &'static str {
        match self {
            JoinAuthority::Open => "public",
            JoinAuthority::Invite(_) => "invite",
        }
    }
}

/// Messages sent to a `SessionActor`. Every one is a state transition that
/// must not interleave with another on the same session.
#[derive(Debug)]
pub enum SessionMessage {
    Join {
        user_id: UserId,
        display_name: String,
        authority: JoinAuthority,
        respond_to: oneshot::Sender<Result<JoinOutcome, LiveError>>,
    },

    Leave {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<LeaveOutcome, LiveError>>,
    },

    /// Host-only force end.
    End {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<EndOutcome, LiveError>>,
    },

    /// Host-only visibility toggle.
    SetVisibility {
        user_id: UserId,
        is_public: bool,
        respond_to: oneshot::Sender<Result<Session, LiveError>>,
    },
}

/// Snapshot of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// Session actors currently supervised.
    pub session_actor_count: usize,
    /// Whether the coordinator has stopped accepting work.
    pub is_draining: bool,
    /// Messages waiting in the coordinator mailbox.
    pub mailbox_depth: usize,
}
