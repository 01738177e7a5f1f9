//! Observability module for the live service.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;
