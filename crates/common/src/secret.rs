//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for signing keys and credentials
//! throughout the workspace. `SecretString` and `SecretBox<T>` implement
//! `Debug` with redaction, so a struct that derives `Debug` while holding one
//! never prints the secret through `{:?}` or tracing fields.
//!
//! Use `SecretString` for:
//! - The identity token verification secret
//! - The invite capability signing secret
//! - Database URLs carrying credentials
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct SigningConfig {
//!     issuer: String,
//!     key: SecretString,
//! }
//!
//! let cfg = SigningConfig {
//!     issuer: "live-service".to_string(),
//!     key: SecretString::from("0123456789abcdef0123456789abcdef"),
//! };
//!
//! assert!(!format!("{cfg:?}").contains("0123456789abcdef"));
//! assert_eq!(cfg.key.expose_secret().len(), 32);
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
