//! Core configuration.
//!
//! Lockout policy, hashing cost, token lifetimes and quota defaults.
//! Loaded from environment variables with defaults suitable for local
//! development.

use chrono::Duration;
use portcullis_providers::ConfigError;

/// Configuration for the authentication core.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Consecutive mismatches that trigger a lockout
    pub password_lockout_attempts: i32,

    /// Lockout length in seconds
    pub password_lockout_duration_secs: i64,

    /// Bcrypt cost for newly written hashes
    pub bcrypt_cost: u32,

    /// Minimum accepted password length in bytes
    pub min_password_length: usize,

    /// Session lifetime in seconds
    pub session_ttl_secs: i64,

    /// Daily email quota for projects without their own
    pub default_email_quota_daily: i64,

    /// Secret for signing access tokens (HS256)
    pub access_token_secret: String,

    /// Access token issuer claim
    pub access_token_issuer: String,

    /// Access token lifetime in seconds
    pub access_token_ttl_secs: i64,
}

impl Default for AuthConfig {
    /// Returns default configuration suitable for local development.
    fn default() -> Self {
        Self {
            password_lockout_attempts: 5,
            password_lockout_duration_secs: 600,
            bcrypt_cost: 12,
            min_password_length: 8,
            session_ttl_secs: 7 * 24 * 60 * 60,
            default_email_quota_daily: 1000,
            access_token_secret: String::new(),
            access_token_issuer: "portcullis".to_string(),
            access_token_ttl_secs: 300,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl AuthConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORTCULLIS_PASSWORD_LOCKOUT_ATTEMPTS`: mismatches before lockout (default: 5)
    /// - `PORTCULLIS_PASSWORD_LOCKOUT_SECS`: lockout length (default: 600)
    /// - `PORTCULLIS_BCRYPT_COST`: bcrypt cost (default: 12)
    /// - `PORTCULLIS_MIN_PASSWORD_LENGTH`: minimum password length (default: 8)
    /// - `PORTCULLIS_SESSION_TTL_SECS`: session lifetime (default: 7 days)
    /// - `PORTCULLIS_DEFAULT_EMAIL_QUOTA_DAILY`: default daily email quota (default: 1000)
    /// - `PORTCULLIS_ACCESS_TOKEN_SECRET`: access token signing secret
    /// - `PORTCULLIS_ACCESS_TOKEN_ISSUER`: access token issuer (default: portcullis)
    /// - `PORTCULLIS_ACCESS_TOKEN_TTL_SECS`: access token lifetime (default: 300)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            password_lockout_attempts: env_parse(
                "PORTCULLIS_PASSWORD_LOCKOUT_ATTEMPTS",
                default.password_lockout_attempts,
            ),
            password_lockout_duration_secs: env_parse(
                "PORTCULLIS_PASSWORD_LOCKOUT_SECS",
                default.password_lockout_duration_secs,
            ),
            bcrypt_cost: env_parse("PORTCULLIS_BCRYPT_COST", default.bcrypt_cost),
            min_password_length: env_parse(
                "PORTCULLIS_MIN_PASSWORD_LENGTH",
                default.min_password_length,
            ),
            session_ttl_secs: env_parse("PORTCULLIS_SESSION_TTL_SECS", default.session_ttl_secs),
            default_email_quota_daily: env_parse(
                "PORTCULLIS_DEFAULT_EMAIL_QUOTA_DAILY",
                default.default_email_quota_daily,
            ),
            access_token_secret: std::env::var("PORTCULLIS_ACCESS_TOKEN_SECRET")
                .unwrap_or(default.access_token_secret),
            access_token_issuer: std::env::var("PORTCULLIS_ACCESS_TOKEN_ISSUER")
                .unwrap_or(default.access_token_issuer),
            access_token_ttl_secs: env_parse(
                "PORTCULLIS_ACCESS_TOKEN_TTL_SECS",
                default.access_token_ttl_secs,
            ),
        }
    }

    pub fn password_lockout_duration(&self) -> Duration {
        Duration::seconds(self.password_lockout_duration_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl_secs)
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_ttl_secs)
    }

    /// Validate that all required configuration is present for production.
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.access_token_secret.len() < 32 {
            return Err(ConfigError::InvalidValue {
                key: "PORTCULLIS_ACCESS_TOKEN_SECRET".to_string(),
                message: "must be at least 32 bytes".to_string(),
            });
        }
        if self.bcrypt_cost < 10 {
            return Err(ConfigError::InvalidValue {
                key: "PORTCULLIS_BCRYPT_COST".to_string(),
                message: "must be at least 10".to_string(),
            });
        }
        if self.password_lockout_attempts < 1 {
            return Err(ConfigError::InvalidValue {
                key: "PORTCULLIS_PASSWORD_LOCKOUT_ATTEMPTS".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
