//! # Live Test Utilities
//!
//! Shared test utilities for the live service.
//!
//! This crate provides:
//! - Server test harness (`TestLiveServer` for HTTP tests)
//! - Token helpers (`user_token`, `invite_token_at`)
//! - A test configuration with fixed secrets
//!
//! ## Usage
//!
//! ```rust,ignore
//! use live_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestLiveServer::spawn().await?;
//!     let client = reqwest::Client::new();
//!
//!     let response = client
//!         .get(format!("{}/api/v1/live/sessions/public", server.url()))
//!         .bearer_auth(user_token(1, "host"))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod server_harness;
pub mod tokens;

pub use server_harness::*;
pub use tokens::*;
