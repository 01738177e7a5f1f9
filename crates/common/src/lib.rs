//! Common utilities and types shared across the live listening workspace.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, clock skew, identity claims)
pub mod jwt;
