//! JWT utilities shared across live listening services.
//!
//! This module provides:
//! - Size limits applied before any token parsing
//! - Clock skew constants for `iat` validation
//! - `iat` validation logic
//! - The identity assertion claims issued by the account service
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Error messages are generic so callers cannot probe which check failed
//! - The `username` field in [`UserClaims`] is redacted in Debug output
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{check_token_size, validate_iat, DEFAULT_CLOCK_SKEW};
//!
//! check_token_size(token)?;
//! // ... verify signature, decode claims ...
//! validate_iat(claims.iat, DEFAULT_CLOCK_SKEW)?;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Identity assertions and invite capabilities are a few hundred bytes. Anything
/// larger is rejected before base64 decoding or signature verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (5 minutes).
///
/// Tokens with `iat` timestamps more than this amount in the future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT pre-validation.
///
/// Every variant displays the same message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not three dot-separated segments).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Identity assertion claims, as issued by the account service.
///
/// The account service signs `{ id, username, email, isAdmin, iat }` and may
/// add `exp`. Only `id` and `username` matter to live sessions; the rest is
/// accepted and ignored.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Account id.
    pub id: i64,

    /// Display name - redacted in Debug output.
    pub username: String,

    /// Email, if the issuer included one. Never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Admin flag from the issuer.
    #[serde(default, rename = "isAdmin", skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,

    /// Issued-at (Unix epoch seconds).
    pub iat: i64,

    /// Optional expiry (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl UserClaims {
    /// Build claims for a user, issued now and without expiry.
    #[must_use]
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: None,
            is_admin: None,
            iat: chrono::Utc::now().timestamp(),
            exp: None,
        }
    }
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("id", &self.id)
            .field("username", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("is_admin", &self.is_admin)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Reject tokens that are oversized or obviously not a compact JWS.
///
/// # Errors
///
/// - `TokenTooLarge` if `token` exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` if it does not have exactly three segments
pub fn check_token_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    if token.split('.').count() != 3 {
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(())
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is more
/// than `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
///
/// # Errors
///
/// Same as [`validate_iat`].
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    // clock_skew is bounded by MAX_CLOCK_SKEW at config time
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}
