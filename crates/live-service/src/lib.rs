//! Live Listening Session Service Library
//!
//! Coordinates live listening sessions: a host plays a playlist, track or
//! album and listeners join, either openly (public sessions) or through a
//! signed invite (private sessions). The service owns the session lifecycle
//! and membership; identity and the music catalogue belong to other services.
//!
//! # Architecture
//!
//! Handler -> Service -> Actor -> Repository:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> actors/*.rs -> repositories/*.rs
//! ```
//!
//! Every transition on an existing session runs inside that session's actor,
//! so joins, leaves and ends on one session are applied one at a time.
//! Read paths go straight to the repository.
//!
//! # Modules
//!
//! - `actors` - Coordinator and per-session actors
//! - `auth` - Identity assertion verification
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `invites` - Invite capability minting and verification
//! - `middleware` - Authentication and HTTP metrics middleware
//! - `models` - Domain records and request/response bodies
//! - `observability` - Prometheus metrics
//! - `repositories` - Session store (Postgres and in-memory)
//! - `routes` - Axum router setup
//! - `services` - Lifecycle, directory, policy and source checks

pub mod actors;
pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod invites;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
