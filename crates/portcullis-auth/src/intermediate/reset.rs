//! Password reset codes.
//!
//! A verified reset code licenses registering a password over an existing
//! one. Codes are single use: verifying clears the stored digest.

use portcullis_audit::IntermediateSessionEvent;
use portcullis_model::{IntermediateSession, LoginMethod};
use portcullis_providers::EmailMessage;
use tracing::{info, instrument};

use super::email::charge_email_quota;
use super::policy::{load, persist};
use super::{IntermediateContext, IntermediateService};
use crate::error::{ApiError, ApiResult};
use crate::tokens::{digest_matches, parse_token_digest, SecretToken, SecretTokenKind};

impl IntermediateService {
    /// Mail a password reset code to the session's verified email.
    #[instrument(skip(self, ctx), fields(intermediate_session_id = %ctx.intermediate_session_id))]
    pub async fn issue_password_reset_code(&self, ctx: &IntermediateContext) -> ApiResult<()> {
        let mut tx = self.store.begin().await?;
        let loaded = load(tx.as_mut(), ctx).await?;
        loaded.require_method(LoginMethod::Password)?;
        loaded.require_email_verified(tx.as_mut()).await?;

        let email = loaded
            .session
            .email
            .clone()
            .ok_or_else(|| ApiError::failed_precondition("intermediate session has no email"))?;

        let code = SecretToken::generate(SecretTokenKind::PasswordResetCode);
        let mut session = loaded.session;
        session.password_reset_code_sha256 = Some(code.sha256().to_vec());
        session.password_reset_code_verified = false;

        let email_quota_usage =
            charge_email_quota(tx.as_mut(), &loaded.project, self.config.default_email_quota_daily).await?;

        let event = IntermediateSessionEvent::PasswordResetCodeIssued {
            intermediate_session_id: session.id,
            email_quota_usage,
        };
        persist(tx.as_mut(), ctx, &session, event).await?;
        tx.commit().await?;

        let message =
            EmailMessage::password_reset_code(&loaded.project.email_from_address(), &email, code.plaintext());
        self.email_sender
            .send(&message)
            .await
            .map_err(|e| ApiError::from_provider("send password reset email", e))?;

        info!("Password reset code issued");
        Ok(())
    }

    /// Redeem a password reset code.
    #[instrument(skip(self, ctx, code), fields(intermediate_session_id = %ctx.intermediate_session_id))]
    pub async fn verify_password_reset_code(
        &self,
        ctx: &IntermediateContext,
        code: &str,
    ) -> ApiResult<IntermediateSession> {
        let mut tx = self.store.begin().await?;
        let loaded = load(tx.as_mut(), ctx).await?;
        loaded.require_method(LoginMethod::Password)?;

        let stored = loaded
            .session
            .password_reset_code_sha256
            .as_deref()
            .ok_or_else(|| ApiError::failed_precondition("no password reset code has been issued"))?;
        let digest = parse_token_digest(SecretTokenKind::PasswordResetCode, code)?;
        if !digest_matches(Some(stored), &digest) {
            return Err(ApiError::invalid_argument("invalid password reset code"));
        }

        let mut session = loaded.session;
        session.password_reset_code_sha256 = None;
        session.password_reset_code_verified = true;

        let event = IntermediateSessionEvent::PasswordResetCodeVerified {
            intermediate_session_id: session.id,
        };
        persist(tx.as_mut(), ctx, &session, event).await?;
        tx.commit().await?;

        info!("Password reset code verified");
        Ok(session)
    }
}
