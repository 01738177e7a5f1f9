//! Invite capabilities.
//!
//! An invite is a bearer credential scoped to one session: an HS256 JWT
//! carrying `{ sid, exp, iat, typ }` and no user identity. Whoever redeems
//! it supplies their own identity at join time.
//!
//! Verification here only proves the token is authentic, well-formed and
//! unexpired. Whether the session is still live is checked by the session
//! actor at the moment of use, inside the serialized join.

use crate::errors::LiveError;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::jwt::check_token_size;
use common::types::SessionId;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value of the `typ` claim on every invite.
pub const INVITE_TOKEN_TYPE: &str = "live_invite";

/// Wire claims of an invite token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteClaims {
    /// Session the invite admits to.
    pub sid: SessionId,
    /// Expiry (Unix epoch seconds).
    pub exp: i64,
    /// Issued-at (Unix epoch seconds).
    pub iat: i64,
    /// Always [`INVITE_TOKEN_TYPE`].
    pub typ: String,
}

/// A verified invite: exactly a session and an absolute expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteCapability {
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
}

impl InviteCapability {
    /// Check the capability can be used to join `session_id` at `now`.
    ///
    /// # Errors
    ///
    /// `Expired` when `now >= expires_at`, `WrongSession` when scoped elsewhere.
    pub fn check_usable_for(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<(), CapabilityError> {
        if now >= self.expires_at {
            return Err(CapabilityError::Expired);
        }
        if self.session_id != session_id {
            return Err(CapabilityError::WrongSession);
        }
        Ok(())
    }
}

/// Why an invite could not be used.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("invite has expired")]
    Expired,

    #[error("invite is malformed")]
    Malformed,

    #[error("invite signature is invalid")]
    BadSignature,

    #[error("invite is for a different session")]
    WrongSession,

    #[error("session has ended")]
    SessionEnded,
}

impl CapabilityError {
    /// Metric label for this failure.
    pub fn outcome(&self) -> &'static str {
        match self {
            CapabilityError::Expired => "expired",
            CapabilityError::Malformed | CapabilityError::BadSignature => "invalid",
            CapabilityError::WrongSession => "wrong_session",
            CapabilityError::SessionEnded => "session_ended",
        }
    }
}

impl From<CapabilityError> for LiveError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Expired => LiveError::CapabilityExpired,
            CapabilityError::Malformed | CapabilityError::BadSignature => {
                LiveError::Forbidden("Invite is invalid".to_string())
            }
            CapabilityError::WrongSession => {
                LiveError::Forbidden("Invite is not valid for this session".to_string())
            }
            CapabilityError::SessionEnded => LiveError::session_inactive(),
        }
    }
}

/// A freshly minted invite.
#[derive(Debug, Clone)]
pub struct IssuedInvite {
    pub token: String,
    pub capability: InviteCapability,
}

/// Mints invite tokens.
pub struct InviteIssuer {
    encoding_key: EncodingKey,
}

impl InviteIssuer {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
        }
    }

    /// Mint an invite for `session_id` valid for `ttl_seconds` from `now`.
    ///
    /// Host authorization and TTL bounds are the caller's job.
    ///
    /// # Errors
    ///
    /// `Validation` if the TTL cannot be represented, `Internal` if signing fails.
    pub fn issue_at(
        &self,
        session_id: SessionId,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<IssuedInvite, LiveError> {
        let ttl = i64::try_from(ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| LiveError::Validation("ttl_seconds is out of range".to_string()))?;
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| LiveError::Validation("ttl_seconds is out of range".to_string()))?;

        let claims = InviteClaims {
            sid: session_id,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            typ: INVITE_TOKEN_TYPE.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| LiveError::Internal(format!("invite signing failed: {e}")))?;

        // Round to the second actually encoded in the token.
        let expires_at = DateTime::from_timestamp(claims.exp, 0).unwrap_or(expires_at);

        Ok(IssuedInvite {
            token,
            capability: InviteCapability {
                session_id,
                expires_at,
            },
        })
    }

    /// Mint an invite valid for `ttl_seconds` from now.
    ///
    /// # Errors
    ///
    /// See [`InviteIssuer::issue_at`].
    pub fn issue(&self, session_id: SessionId, ttl_seconds: u64) -> Result<IssuedInvite, LiveError> {
        self.issue_at(session_id, ttl_seconds, Utc::now())
    }
}

/// Verifies invite tokens.
pub struct InviteVerifier {
    decoding_key: DecodingKey,
}

impl InviteVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Verify `token` against the current time.
    ///
    /// # Errors
    ///
    /// See [`InviteVerifier::verify_at`].
    pub fn verify(&self, token: &str) -> Result<InviteCapability, CapabilityError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify `token` as of `now`.
    ///
    /// Signature is checked before expiry, so a forged expired token reports
    /// `BadSignature`.
    ///
    /// # Errors
    ///
    /// `Malformed`, `BadSignature` or `Expired`.
    pub fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<InviteCapability, CapabilityError> {
        let result = self.verify_inner(token, now);
        metrics::record_invite_verification(match &result {
            Ok(_) => "valid",
            Err(e) => e.outcome(),
        });
        result
    }

    fn verify_inner(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<InviteCapability, CapabilityError> {
        check_token_size(token).map_err(|_| CapabilityError::Malformed)?;

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared against the caller's clock below, without leeway.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);
        validation.leeway = 0;

        let claims = decode::<InviteClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => CapabilityError::BadSignature,
                _ => {
                    tracing::debug!(target: "live.invites", error = %e, "Invite decode failed");
                    CapabilityError::Malformed
                }
            })?
            .claims;

        if claims.typ != INVITE_TOKEN_TYPE {
            tracing::debug!(target: "live.invites", typ = %claims.typ, "Unexpected token type");
            return Err(CapabilityError::Malformed);
        }

        let expires_at =
            DateTime::from_timestamp(claims.exp, 0).ok_or(CapabilityError::Malformed)?;
        if now >= expires_at {
            return Err(CapabilityError::Expired);
        }

        Ok(InviteCapability {
            session_id: claims.sid,
            expires_at,
        })
    }
}
