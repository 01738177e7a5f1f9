//! Actor model for per-session serialization.
//!
//! ```text
//! CoordinatorActor (singleton per service instance)
//! └── supervises N SessionActors
//!     └── SessionActor (one per session with recent activity)
//!         └── serializes join / leave / end / visibility for its session
//! ```
//!
//! # Key Design Decisions
//!
//! - **Actors add ordering, the store adds atomicity**: an actor makes the
//!   transitions of one session strictly sequential inside this process;
//!   the store's row lock covers other processes
//! - **CancellationToken propagation**: session actors run on child tokens
//!   of the coordinator's root token
//! - **Drain before exit**: an exiting actor closes its mailbox and handles
//!   what is already queued
//!
//! # Modules
//!
//! - [`coordinator`] - `CoordinatorActor` singleton that supervises session actors
//! - [`session`] - `SessionActor` per session
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor counters

pub mod coordinator;
pub mod messages;
pub mod metrics;
pub mod session;

pub use coordinator::{CoordinatorActor, CoordinatorActorHandle};
pub use messages::{CoordinatorMessage, CoordinatorStatus, JoinAuthority, SessionMessage};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use session::{SessionActor, SessionActorHandle, SessionCallError};
