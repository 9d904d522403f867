//! Exchanging an intermediate session for a session.

use chrono::Utc;
use portcullis_model::{IntermediateSession, LoginMethod, PrimaryAuthFactor, Session, User};
use portcullis_store::Transaction;
use tracing::{info, instrument};

use super::policy::load;
use super::{IntermediateContext, IntermediateService};
use crate::error::{ApiError, ApiResult};
use crate::linker;
use crate::session::issue_session;

/// Result of a successful exchange.
pub struct ExchangedSession {
    pub session: Session,
    pub user: User,

    /// Whether the exchange created the user
    pub user_created: bool,

    /// Refresh token plaintext; not retrievable again
    pub refresh_token: String,

    pub access_token: String,
}

impl std::fmt::Debug for ExchangedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangedSession")
            .field("session", &self.session)
            .field("user", &self.user)
            .field("user_created", &self.user_created)
            .field("refresh_token", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

fn login_method(factor: PrimaryAuthFactor) -> LoginMethod {
    match factor {
        PrimaryAuthFactor::Password => LoginMethod::Password,
        PrimaryAuthFactor::Email => LoginMethod::Email,
        PrimaryAuthFactor::Google => LoginMethod::Google,
        PrimaryAuthFactor::Microsoft => LoginMethod::Microsoft,
        PrimaryAuthFactor::Github => LoginMethod::Github,
        PrimaryAuthFactor::Saml => LoginMethod::Saml,
        PrimaryAuthFactor::Oidc => LoginMethod::Oidc,
        PrimaryAuthFactor::Passkey => LoginMethod::Passkey,
        PrimaryAuthFactor::AuthenticatorApp => LoginMethod::AuthenticatorApp,
    }
}

/// Copy what the session learned onto `user`.
fn attach_session_identity(user: &mut User, session: &IntermediateSession) -> ApiResult<()> {
    for (provider, subject) in session.provider_subjects() {
        match user.provider_subject(provider) {
            Some(linked) if linked != subject => {
                return Err(ApiError::failed_precondition(format!(
                    "user is already linked to a different {} account",
                    provider
                )));
            }
            Some(_) => {}
            None => user.set_provider_subject(provider, subject.to_string()),
        }
    }

    if let Some(hash) = &session.new_user_password_bcrypt {
        user.password_bcrypt = Some(hash.clone());
        user.failed_password_attempts = 0;
        user.password_lockout_expire_time = None;
    }
    if user.display_name.is_none() {
        user.display_name = session.display_name.clone();
    }
    if user.profile_picture_url.is_none() {
        user.profile_picture_url = session.profile_picture_url.clone();
    }
    user.update_time = Utc::now();
    Ok(())
}

impl IntermediateService {
    /// Exchange the intermediate session for a session.
    ///
    /// Succeeds at most once per intermediate session. The refresh token in
    /// the result is the only copy of its plaintext.
    #[instrument(skip(self, ctx), fields(intermediate_session_id = %ctx.intermediate_session_id))]
    pub async fn exchange_intermediate_session_for_session(
        &self,
        ctx: &IntermediateContext,
    ) -> ApiResult<ExchangedSession> {
        let mut tx = self.store.begin().await?;
        let loaded = load(tx.as_mut(), ctx).await?;

        let organization = loaded.require_organization()?.clone();
        let factor = loaded
            .session
            .primary_auth_factor
            .ok_or_else(|| ApiError::failed_precondition("no primary auth factor has been verified"))?;
        loaded.require_method(login_method(factor))?;
        loaded.require_email_verified(tx.as_mut()).await?;
        if !loaded.session.primary_factor_satisfied() {
            return Err(ApiError::failed_precondition(
                "primary auth factor has not been verified",
            ));
        }
        if organization.mfa_enforceable() && !loaded.session.second_factor_satisfied() {
            return Err(ApiError::failed_precondition(
                "organization requires a second factor",
            ));
        }

        let mut intermediate = loaded.session;
        let (user, user_created) = resolve_user(tx.as_mut(), organization.id, &intermediate).await?;

        intermediate.exchange_time = Some(Utc::now());
        tx.update_intermediate_session(&intermediate).await?;

        let issued = issue_session(
            tx.as_mut(),
            ctx.actor(),
            &intermediate,
            &user,
            user_created,
            self.config.session_ttl(),
        )
        .await?;
        tx.commit().await?;

        let access_token = self.access_tokens.issue_access_token(&issued.refresh_token).await?;

        info!(user_id = %user.id, user_created, "Intermediate session exchanged");
        Ok(ExchangedSession {
            session: issued.session,
            user,
            user_created,
            refresh_token: issued.refresh_token,
            access_token,
        })
    }
}

/// The user the session resolves to, creating one if none matches.
async fn resolve_user(
    tx: &mut dyn Transaction,
    organization_id: uuid::Uuid,
    session: &IntermediateSession,
) -> ApiResult<(User, bool)> {
    if let Some(mut user) = linker::match_user_for_exchange(tx, organization_id, session).await? {
        attach_session_identity(&mut user, session)?;
        tx.update_user(&user).await?;
        return Ok((user, false));
    }

    let email = session
        .email
        .clone()
        .ok_or_else(|| ApiError::failed_precondition("intermediate session has no email"))?;
    let mut user = User::new(organization_id, email);
    attach_session_identity(&mut user, session)?;
    tx.create_user(&user).await?;
    Ok((user, true))
}
