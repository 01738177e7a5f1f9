//! Live service configuration.
//!
//! Configuration is loaded from environment variables. The database URL and
//! both signing secrets are redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default invite lifetime (30 minutes).
pub const DEFAULT_INVITE_TTL_SECONDS: u64 = 1800;

/// Default ceiling for caller-requested invite lifetimes (24 hours).
pub const DEFAULT_INVITE_MAX_TTL_SECONDS: u64 = 86_400;

/// Default idle period after which a session actor exits.
pub const DEFAULT_SESSION_ACTOR_IDLE_SECONDS: u64 = 300;

/// Minimum invite signing secret length in bytes (HS256 key size).
pub const MIN_INVITE_SECRET_BYTES: usize = 32;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "live";

/// Live service configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// HS256 secret shared with the account service that signs identity tokens.
    pub auth_jwt_secret: SecretString,

    /// HS256 secret used only for invite capabilities (>= 32 bytes).
    pub invite_signing_secret: SecretString,

    /// Invite lifetime when the host does not ask for one.
    pub invite_default_ttl_seconds: u64,

    /// Upper bound applied to requested invite lifetimes.
    pub invite_max_ttl_seconds: u64,

    /// JWT clock skew tolerance in seconds for identity `iat` validation.
    pub jwt_clock_skew_seconds: i64,

    /// Idle period after which a session actor exits.
    pub session_actor_idle_seconds: u64,

    /// Unique identifier for this instance, used in logs and actor ids.
    pub instance_id: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("auth_jwt_secret", &"[REDACTED]")
            .field("invite_signing_secret", &"[REDACTED]")
            .field("invite_default_ttl_seconds", &self.invite_default_ttl_seconds)
            .field("invite_max_ttl_seconds", &self.invite_max_ttl_seconds)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("session_actor_idle_seconds", &self.session_actor_idle_seconds)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid secret configuration: {0}")]
    InvalidSecret(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid invite TTL configuration: {0}")]
    InvalidInviteTtl(String),

    #[error("Invalid session actor idle configuration: {0}")]
    InvalidActorIdle(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = required(vars, "DATABASE_URL")?;

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let auth_jwt_secret = required(vars, "AUTH_JWT_SECRET")?;
        if auth_jwt_secret.trim().is_empty() {
            return Err(ConfigError::InvalidSecret(
                "AUTH_JWT_SECRET must not be empty".to_string(),
            ));
        }

        let invite_signing_secret = required(vars, "INVITE_SIGNING_SECRET")?;
        if invite_signing_secret.len() < MIN_INVITE_SECRET_BYTES {
            return Err(ConfigError::InvalidSecret(format!(
                "INVITE_SIGNING_SECRET must be at least {} bytes, got {}",
                MIN_INVITE_SECRET_BYTES,
                invite_signing_secret.len()
            )));
        }
        if invite_signing_secret == auth_jwt_secret {
            return Err(ConfigError::InvalidSecret(
                "INVITE_SIGNING_SECRET must differ from AUTH_JWT_SECRET".to_string(),
            ));
        }

        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            #[allow(clippy::cast_possible_wrap)]
            let max = MAX_CLOCK_SKEW.as_secs() as i64;
            if value > max {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    max, value
                )));
            }

            value
        } else {
            #[allow(clippy::cast_possible_wrap)]
            let default = DEFAULT_CLOCK_SKEW.as_secs() as i64;
            default
        };

        let invite_default_ttl_seconds = positive_u64(
            vars,
            "INVITE_DEFAULT_TTL_SECONDS",
            DEFAULT_INVITE_TTL_SECONDS,
            ConfigError::InvalidInviteTtl,
        )?;
        let invite_max_ttl_seconds = positive_u64(
            vars,
            "INVITE_MAX_TTL_SECONDS",
            DEFAULT_INVITE_MAX_TTL_SECONDS,
            ConfigError::InvalidInviteTtl,
        )?;
        if invite_default_ttl_seconds > invite_max_ttl_seconds {
            return Err(ConfigError::InvalidInviteTtl(format!(
                "INVITE_DEFAULT_TTL_SECONDS ({}) must not exceed INVITE_MAX_TTL_SECONDS ({})",
                invite_default_ttl_seconds, invite_max_ttl_seconds
            )));
        }

        let session_actor_idle_seconds = positive_u64(
            vars,
            "SESSION_ACTOR_IDLE_SECONDS",
            DEFAULT_SESSION_ACTOR_IDLE_SECONDS,
            ConfigError::InvalidActorIdle,
        )?;

        let instance_id = vars.get("LIVE_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{}-{}", DEFAULT_INSTANCE_ID_PREFIX, short_suffix)
        });

        Ok(Config {
            database_url,
            bind_address,
            auth_jwt_secret: SecretString::from(auth_jwt_secret),
            invite_signing_secret: SecretString::from(invite_signing_secret),
            invite_default_ttl_seconds,
            invite_max_ttl_seconds,
            jwt_clock_skew_seconds,
            session_actor_idle_seconds,
            instance_id,
        })
    }

    /// Invite signing key bytes.
    pub fn invite_key(&self) -> &[u8] {
        self.invite_signing_secret.expose_secret().as_bytes()
    }

    /// Identity token verification key bytes.
    pub fn auth_key(&self) -> &[u8] {
        self.auth_jwt_secret.expose_secret().as_bytes()
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn positive_u64(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    make_err: fn(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        make_err(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(make_err(format!("{} must be greater than 0", name)));
    }

    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://user:pw@localhost/live_test".to_string(),
            ),
            ("AUTH_JWT_SECRET".to_string(), "remixmatch-secret".to_string()),
            (
                "INVITE_SIGNING_SECRET".to_string(),
                "an-invite-signing-secret-of-32-bytes!".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.database_url, "postgresql://user:pw@localhost/live_test");
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.invite_default_ttl_seconds, 1800);
        assert_eq!(config.invite_max_ttl_seconds, 86_400);
        assert_eq!(config.jwt_clock_skew_seconds, 300);
        assert_eq!(config.session_actor_idle_seconds, 300);
        assert!(config.instance_id.starts_with("live-"));
        assert_eq!(config.auth_key(), b"remixmatch-secret");
    }

    #[test]
    fn test_missing_required_vars() {
        for name in ["DATABASE_URL", "AUTH_JWT_SECRET", "INVITE_SIGNING_SECRET"] {
            let mut vars = base_vars();
            vars.remove(name);
            let err = Config::from_vars(&vars).unwrap_err();
            assert!(
                matches!(&err, ConfigError::MissingEnvVar(missing) if missing == name),
                "expected MissingEnvVar for {name}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_short_invite_secret_rejected() {
        let mut vars = base_vars();
        vars.insert("INVITE_SIGNING_SECRET".to_string(), "too-short".to_string());
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSecret(_)));
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn test_invite_secret_must_differ_from_auth_secret() {
        let mut vars = base_vars();
        let shared = "the-same-secret-for-both-purposes-xx".to_string();
        vars.insert("AUTH_JWT_SECRET".to_string(), shared.clone());
        vars.insert("INVITE_SIGNING_SECRET".to_string(), shared);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidSecret(_))
        ));
    }

    #[test]
    fn test_clock_skew_bounds() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "600".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().jwt_clock_skew_seconds, 600);

        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "601".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));

        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));

        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "soon".to_string());
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("must be a valid integer, got 'soon'"));
    }

    #[test]
    fn test_invite_ttl_validation() {
        let mut vars = base_vars();
        vars.insert("INVITE_DEFAULT_TTL_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidInviteTtl(_))
        ));

        let mut vars = base_vars();
        vars.insert("INVITE_DEFAULT_TTL_SECONDS".to_string(), "7200".to_string());
        vars.insert("INVITE_MAX_TTL_SECONDS".to_string(), "3600".to_string());
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("must not exceed INVITE_MAX_TTL_SECONDS"));
    }

    #[test]
    fn test_actor_idle_validation() {
        let mut vars = base_vars();
        vars.insert("SESSION_ACTOR_IDLE_SECONDS".to_string(), "-5".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidActorIdle(_))
        ));

        vars.insert("SESSION_ACTOR_IDLE_SECONDS".to_string(), "15".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().session_actor_idle_seconds, 15);
    }

    #[test]
    fn test_explicit_instance_id() {
        let mut vars = base_vars();
        vars.insert("LIVE_INSTANCE_ID".to_string(), "live-east-1".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().instance_id, "live-east-1");
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let config = Config::from_vars(&base_vars()).unwrap();
        let debug = format!("{:?}", config);

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("user:pw"));
        assert!(!debug.contains("remixmatch-secret"));
        assert!(!debug.contains("an-invite-signing-secret"));
        assert!(debug.contains("0.0.0.0:8080"));
    }
}
