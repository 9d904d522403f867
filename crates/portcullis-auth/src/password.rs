//! Credential matching
//!
//! Verifies passwords against stored bcrypt hashes and applies the lockout
//! policy. Every check against a user record goes through
//! [`CredentialMatcher::match_password`], which writes its bookkeeping into
//! the caller's transaction and never commits on its own.
//!
//! On a mismatch the counter and its audit event must be committed before
//! the error is returned, or an attacker could guess forever by aborting
//! each request. [`MatchOutcome::Rejected`] carries the error so the caller
//! can commit first:
//!
//! ```rust,ignore
//! match matcher.match_password(tx.as_mut(), project_id, actor, &mut user, &password).await? {
//!     MatchOutcome::Matched => { /* rewrite hash, continue */ }
//!     MatchOutcome::Rejected(err) => {
//!         tx.commit().await?;
//!         return Err(err);
//!     }
//! }
//! ```
//!
//! bcrypt runs on the blocking pool so it does not stall the runtime.

use chrono::{Duration, Utc};
use portcullis_audit::{Actor, UserEvent};
use portcullis_model::User;
use portcullis_store::Transaction;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::audit::record;
use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};

const LOCKED_OUT: &str = "too many password attempts; user is temporarily locked out";

/// Result of a password check that reached the hash comparison.
#[derive(Debug)]
pub enum MatchOutcome {
    /// The password matched; the user's counter was reset in memory and the
    /// caller persists it together with the rewritten hash.
    Matched,

    /// The password did not match; bookkeeping was written to the
    /// transaction, which the caller must commit before returning the error.
    Rejected(ApiError),
}

/// Password hashing and lockout policy.
#[derive(Debug, Clone)]
pub struct CredentialMatcher {
    lockout_attempts: i32,
    lockout_duration: Duration,
    bcrypt_cost: u32,
}

impl CredentialMatcher {
    pub fn new(lockout_attempts: i32, lockout_duration: Duration, bcrypt_cost: u32) -> Self {
        Self {
            lockout_attempts: lockout_attempts.max(1),
            lockout_duration,
            bcrypt_cost,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.password_lockout_attempts,
            config.password_lockout_duration(),
            config.bcrypt_cost,
        )
    }

    /// Hash `password` at the configured cost.
    pub async fn hash(&self, password: &SecretString) -> ApiResult<String> {
        let password = password.expose_secret().clone();
        let cost = self.bcrypt_cost;

        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| ApiError::internal("bcrypt task failed", e))?
            .map_err(|e| ApiError::internal("hash password", e))
    }

    /// Compare `password` with `hash` without any lockout bookkeeping.
    ///
    /// Used for hashes that are not attached to a user yet.
    pub async fn verify_hash(&self, password: &SecretString, hash: &str) -> ApiResult<bool> {
        let password = password.expose_secret().clone();
        let hash = hash.to_string();

        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| ApiError::internal("bcrypt task failed", e))?
            .map_err(|e| ApiError::internal("verify password hash", e))
    }

    /// Check `password` against `user`, applying the lockout policy.
    ///
    /// Fails outright, with nothing written, when the user has no password
    /// or is locked out.
    #[instrument(skip(self, tx, actor, user, password), fields(user_id = %user.id))]
    pub async fn match_password(
        &self,
        tx: &mut dyn Transaction,
        project_id: Uuid,
        actor: Actor,
        user: &mut User,
        password: &SecretString,
    ) -> ApiResult<MatchOutcome> {
        let hash = user
            .password_bcrypt
            .clone()
            .ok_or_else(|| ApiError::failed_precondition("user does not have a password configured"))?;

        let now = Utc::now();
        if user.is_locked_out(now) {
            debug!("Password check refused during lockout");
            return Err(ApiError::failed_precondition(LOCKED_OUT));
        }

        if self.verify_hash(password, &hash).await? {
            user.failed_password_attempts = 0;
            user.password_lockout_expire_time = None;
            return Ok(MatchOutcome::Matched);
        }

        user.failed_password_attempts += 1;
        let (event, err) = if user.failed_password_attempts >= self.lockout_attempts {
            let lockout_expire_time = now + self.lockout_duration;
            user.failed_password_attempts = 0;
            user.password_lockout_expire_time = Some(lockout_expire_time);
            info!(%lockout_expire_time, "User locked out after repeated password mismatches");
            (
                UserEvent::PasswordLockedOut {
                    user_id: user.id,
                    organization_id: user.organization_id,
                    lockout_expire_time,
                },
                ApiError::failed_precondition(LOCKED_OUT),
            )
        } else {
            (
                UserEvent::PasswordAttemptFailed {
                    user_id: user.id,
                    organization_id: user.organization_id,
                },
                ApiError::IncorrectPassword,
            )
        };
        user.update_time = now;

        tx.update_user(user).await?;
        record(tx, event.to_event(project_id, actor)).await?;

        Ok(MatchOutcome::Rejected(err))
    }
}
