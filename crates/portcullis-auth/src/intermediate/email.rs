//! Email verification challenges and the daily email quota.

use chrono::Utc;
use portcullis_audit::IntermediateSessionEvent;
use portcullis_model::{IntermediateSession, LoginMethod, PrimaryAuthFactor, Project, VerifiedEmail};
use portcullis_providers::EmailMessage;
use portcullis_store::Transaction;
use tracing::{info, instrument, warn};

use super::policy::{load, persist};
use super::{IntermediateContext, IntermediateService};
use crate::error::{ApiError, ApiResult};
use crate::tokens::{digest_matches, parse_token_digest, SecretToken, SecretTokenKind};

/// Count one outbound email against the project's daily quota.
///
/// Returns the usage including this email. Over quota, the caller's
/// transaction is abandoned, which also discards the increment.
pub(super) async fn charge_email_quota(
    tx: &mut dyn Transaction,
    project: &Project,
    default_quota: i64,
) -> ApiResult<i64> {
    let usage = tx
        .increment_email_quota_daily_usage(project.id, Utc::now().date_naive())
        .await?;
    if usage > project.effective_email_quota(default_quota) {
        warn!(project_id = %project.id, "Daily email quota exceeded");
        return Err(ApiError::failed_precondition("email daily quota exceeded"));
    }
    Ok(usage)
}

impl IntermediateService {
    /// Send a verification code to `email`.
    ///
    /// Allowed when email login or password login is enabled; password
    /// registration and reset both need a verified email.
    ///
    /// The code is mailed after the transaction commits; a delivery failure
    /// is reported but the issued code stays valid.
    #[instrument(skip(self, ctx, email), fields(intermediate_session_id = %ctx.intermediate_session_id))]
    pub async fn issue_email_verification_challenge(
        &self,
        ctx: &IntermediateContext,
        email: &str,
    ) -> ApiResult<()> {
        if !email.contains('@') {
            return Err(ApiError::invalid_argument("malformed email address"));
        }

        let mut tx = self.store.begin().await?;
        let mut loaded = load(tx.as_mut(), ctx).await?;
        loaded.require_any_method(&[LoginMethod::Email, LoginMethod::Password])?;
        loaded.bind_email(email)?;
        if loaded.session.email_verification_challenge_completed {
            return Err(ApiError::failed_precondition("email has already been verified"));
        }

        let code = SecretToken::generate(SecretTokenKind::EmailVerificationChallengeCode);
        let mut session = loaded.session;
        session.email_verification_challenge_sha256 = Some(code.sha256().to_vec());

        let email_quota_usage =
            charge_email_quota(tx.as_mut(), &loaded.project, self.config.default_email_quota_daily).await?;

        let event = IntermediateSessionEvent::EmailVerificationChallengeIssued {
            intermediate_session_id: session.id,
            email: email.to_string(),
            email_quota_usage,
        };
        persist(tx.as_mut(), ctx, &session, event).await?;
        tx.commit().await?;

        let message = EmailMessage::verification_code(&loaded.project.email_from_address(), email, code.plaintext());
        self.email_sender
            .send(&message)
            .await
            .map_err(|e| ApiError::from_provider("send verification email", e))?;

        info!("Email verification challenge issued");
        Ok(())
    }

    /// Redeem an email verification code.
    ///
    /// Email becomes the primary factor only where email login is enabled.
    /// Otherwise the session waits for a password check to fix it.
    #[instrument(skip(self, ctx, code), fields(intermediate_session_id = %ctx.intermediate_session_id))]
    pub async fn verify_email_challenge(
        &self,
        ctx: &IntermediateContext,
        code: &str,
    ) -> ApiResult<IntermediateSession> {
        let mut tx = self.store.begin().await?;
        let loaded = load(tx.as_mut(), ctx).await?;
        loaded.require_any_method(&[LoginMethod::Email, LoginMethod::Password])?;

        let stored = loaded
            .session
            .email_verification_challenge_sha256
            .as_deref()
            .ok_or_else(|| ApiError::failed_precondition("no email verification challenge has been issued"))?;
        let digest = parse_token_digest(SecretTokenKind::EmailVerificationChallengeCode, code)?;
        if !digest_matches(Some(stored), &digest) {
            return Err(ApiError::invalid_argument("invalid email verification code"));
        }

        let email_login = loaded.allows_method(LoginMethod::Email);
        let mut session = loaded.session;
        let email = session
            .email
            .clone()
            .ok_or_else(|| ApiError::failed_precondition("intermediate session has no email"))?;
        session.email_verification_challenge_completed = true;
        session.email_verification_challenge_sha256 = None;
        if email_login {
            session.fix_primary_auth_factor(PrimaryAuthFactor::Email);
        }

        tx.upsert_verified_email(&VerifiedEmail::from_email_challenge(loaded.project.id, email.clone()))
            .await?;

        let event = IntermediateSessionEvent::EmailVerified {
            intermediate_session_id: session.id,
            email,
        };
        persist(tx.as_mut(), ctx, &session, event).await?;
        tx.commit().await?;

        info!("Email verified");
        Ok(session)
    }
}
