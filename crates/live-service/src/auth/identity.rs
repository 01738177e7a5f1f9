//! Identity assertion verification.
//!
//! The account service signs `{ id, username, iat[, exp] }` with a shared
//! HS256 secret. Tokens are size-checked before parsing, `exp` is enforced
//! when present, and `iat` must not be further in the future than the
//! configured clock skew. Every failure surfaces as the same generic
//! `InvalidToken` message.

use crate::errors::LiveError;
use common::jwt::{check_token_size, validate_iat, UserClaims};
use common::types::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tracing::instrument;

const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// The caller, as asserted by the identity service.
///
/// Inserted into request extensions by `require_user_auth`.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub display_name: String,
}

impl fmt::Debug for AuthenticatedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedUser")
            .field("user_id", &self.user_id)
            .field("display_name", &"[REDACTED]")
            .finish()
    }
}

impl From<UserClaims> for AuthenticatedUser {
    fn from(claims: UserClaims) -> Self {
        Self {
            user_id: UserId(claims.id),
            display_name: claims.username,
        }
    }
}

/// Verifies identity assertions issued by the account service.
pub struct IdentityVerifier {
    decoding_key: DecodingKey,
    clock_skew: Duration,
}

impl IdentityVerifier {
    /// Create a verifier for the shared `secret`.
    pub fn new(secret: &[u8], clock_skew_seconds: i64) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            clock_skew: Duration::from_secs(clock_skew_seconds.unsigned_abs()),
        }
    }

    /// Validate a bearer token and return the caller.
    ///
    /// # Errors
    ///
    /// Returns `LiveError::InvalidToken` with a generic message on any failure.
    #[instrument(skip_all)]
    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, LiveError> {
        check_token_size(token).map_err(|e| {
            tracing::debug!(target: "live.auth", error = ?e, "Token pre-check failed");
            invalid_token()
        })?;

        let mut validation = Validation::new(Algorithm::HS256);
        // The account service issues tokens without `exp`; enforce it only when present.
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;
        validation.leeway = 0;

        let claims = decode::<UserClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(target: "live.auth", error = %e, "Token verification failed");
                invalid_token()
            })?
            .claims;

        if let Err(e) = validate_iat(claims.iat, self.clock_skew) {
            tracing::debug!(target: "live.auth", error = ?e, "Token iat validation failed");
            return Err(invalid_token());
        }

        if claims.username.trim().is_empty() {
            tracing::debug!(target: "live.auth", user_id = claims.id, "Token has empty username");
            return Err(invalid_token());
        }

        Ok(AuthenticatedUser::from(claims))
    }
}

fn invalid_token() -> LiveError {
    LiveError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
}
