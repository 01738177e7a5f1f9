//! Token helpers for tests.
//!
//! Identity tokens are signed with [`TEST_AUTH_SECRET`], the secret
//! [`test_config`](crate::test_config) gives the service.

use chrono::{DateTime, Utc};
use common::jwt::UserClaims;
use common::types::SessionId;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use live_service::invites::{InviteClaims, INVITE_TOKEN_TYPE};

/// Identity secret shared with the account service in tests.
pub const TEST_AUTH_SECRET: &str = "test-auth-secret-that-is-long-enough-0001";

/// Invite signing secret in tests (at least 32 bytes).
pub const TEST_INVITE_SECRET: &str = "test-invite-secret-that-is-long-enough-02";

/// Sign arbitrary identity claims with `secret`.
pub fn sign_user_claims(claims: &UserClaims, secret: &str) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("identity claims should sign")
}

/// A valid identity token for user `id` with display name `username`.
pub fn user_token(id: i64, username: &str) -> String {
    sign_user_claims(&UserClaims::new(id, username), TEST_AUTH_SECRET)
}

/// An invite for `session_id` issued at `issued_at` and expiring at `expires_at`,
/// signed with the test invite secret. Lets tests mint already-expired invites.
pub fn invite_token_at(
    session_id: SessionId,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> String {
    let claims = InviteClaims {
        sid: session_id,
        exp: expires_at.timestamp(),
        iat: issued_at.timestamp(),
        typ: INVITE_TOKEN_TYPE.to_string(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_INVITE_SECRET.as_bytes()),
    )
    .expect("invite claims should sign")
}
