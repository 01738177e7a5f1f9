//! Authentication module for the live service.
//!
//! Identity comes from the external account service as an HS256 JWT. This
//! module verifies it and turns it into an [`AuthenticatedUser`].
//!
//! - `identity` - identity assertion verification

pub mod identity;

pub use identity::{AuthenticatedUser, IdentityVerifier};
