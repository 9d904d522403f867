//! Password registration and verification.

use async_trait::async_trait;
use chrono::Utc;
use portcullis_audit::IntermediateSessionEvent;
use portcullis_model::{IntermediateSession, LoginMethod, PrimaryAuthFactor, User};
use portcullis_store::Transaction;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument, warn};

use super::policy::{load, persist, Loaded};
use super::{IntermediateContext, IntermediateService};
use crate::error::{ApiError, ApiResult};
use crate::linker;
use crate::password::MatchOutcome;
use crate::two_phase::{run_two_phase, TwoPhase};

/// bcrypt ignores everything past this many bytes.
const MAX_PASSWORD_BYTES: usize = 72;

impl IntermediateService {
    /// Stage a new password for the session's user.
    ///
    /// The hash is attached to the user at exchange. Replacing an existing
    /// password needs a verified reset code, which this consumes.
    #[instrument(skip(self, ctx, password), fields(intermediate_session_id = %ctx.intermediate_session_id))]
    pub async fn register_password(
        &self,
        ctx: &IntermediateContext,
        password: &SecretString,
    ) -> ApiResult<IntermediateSession> {
        let length = password.expose_secret().len();
        if length < self.config.min_password_length {
            return Err(ApiError::invalid_argument(format!(
                "password must be at least {} characters",
                self.config.min_password_length
            )));
        }
        if length > MAX_PASSWORD_BYTES {
            return Err(ApiError::invalid_argument(format!(
                "password must be at most {} bytes",
                MAX_PASSWORD_BYTES
            )));
        }

        let step = RegisterPassword {
            service: self,
            ctx,
            password,
        };
        run_two_phase(self.store.as_ref(), ctx.deadline, &step).await
    }

    /// Check a password.
    ///
    /// Without `email` this is the challenge flow for a session already bound
    /// to an organization. With `email` it is a direct login that finds the
    /// single user across the project and binds the session to them.
    #[instrument(skip(self, ctx, email, password), fields(intermediate_session_id = %ctx.intermediate_session_id))]
    pub async fn verify_password(
        &self,
        ctx: &IntermediateContext,
        email: Option<&str>,
        password: &SecretString,
    ) -> ApiResult<IntermediateSession> {
        let mut tx = self.store.begin().await?;
        let mut loaded = load(tx.as_mut(), ctx).await?;

        let event = match email {
            None => self.verify_challenge(tx.as_mut(), ctx, &mut loaded, password).await,
            Some(email) => self.verify_direct(tx.as_mut(), ctx, &mut loaded, email, password).await,
        };
        let event = match event {
            Ok(event) => event,
            Err(Rejected::Commit(err)) => {
                tx.commit().await?;
                return Err(err);
            }
            Err(Rejected::Abort(err)) => return Err(err),
        };

        let mut session = loaded.session;
        session.password_verified = true;
        session.fix_primary_auth_factor(PrimaryAuthFactor::Password);
        persist(tx.as_mut(), ctx, &session, event).await?;
        tx.commit().await?;

        info!("Password verified");
        Ok(session)
    }

    async fn verify_challenge(
        &self,
        tx: &mut dyn Transaction,
        ctx: &IntermediateContext,
        loaded: &mut Loaded,
        password: &SecretString,
    ) -> Result<IntermediateSessionEvent, Rejected> {
        let organization_id = loaded.require_organization()?.id;
        loaded.require_method(LoginMethod::Password)?;
        loaded.require_email_verified(tx).await?;
        if loaded.session.password_verified {
            return Err(ApiError::failed_precondition("password has already been verified").into());
        }

        if let Some(staged) = loaded.session.new_user_password_bcrypt.as_deref() {
            if !self.matcher.verify_hash(password, staged).await? {
                return Err(ApiError::IncorrectPassword.into());
            }
        } else {
            let email = loaded
                .session
                .email
                .clone()
                .ok_or_else(|| ApiError::failed_precondition("intermediate session has no email"))?;
            let mut user = linker::match_user_by_email(tx, organization_id, &email)
                .await?
                .ok_or_else(|| ApiError::failed_precondition("user does not have a password configured"))?;
            self.match_and_rehash(tx, ctx, &mut user, password).await?;
        }

        Ok(IntermediateSessionEvent::PasswordVerified {
            intermediate_session_id: loaded.session.id,
            organization_id,
        })
    }

    async fn verify_direct(
        &self,
        tx: &mut dyn Transaction,
        ctx: &IntermediateContext,
        loaded: &mut Loaded,
        email: &str,
        password: &SecretString,
    ) -> Result<IntermediateSessionEvent, Rejected> {
        if loaded.session.organization_id.is_some() {
            return Err(ApiError::failed_precondition(
                "intermediate session is already bound to an organization",
            )
            .into());
        }
        loaded.require_method(LoginMethod::Password)?;
        if loaded.session.email.as_deref().is_some_and(|existing| existing != email) {
            return Err(ApiError::invalid_argument("email does not match intermediate session email").into());
        }

        let mut user = linker::match_unique_user_for_password_login(tx, loaded.project.id, email).await?;
        self.match_and_rehash(tx, ctx, &mut user, password).await?;

        loaded.session.organization_id = Some(user.organization_id);
        loaded.session.email = Some(user.email.clone());
        loaded.session.email_verification_challenge_completed = true;

        Ok(IntermediateSessionEvent::PasswordLogin {
            intermediate_session_id: loaded.session.id,
            organization_id: user.organization_id,
            user_id: user.id,
        })
    }

    /// Run the credential matcher and rewrite the hash at the current cost.
    async fn match_and_rehash(
        &self,
        tx: &mut dyn Transaction,
        ctx: &IntermediateContext,
        user: &mut User,
        password: &SecretString,
    ) -> Result<(), Rejected> {
        match self
            .matcher
            .match_password(tx, ctx.project_id, ctx.actor(), user, password)
            .await?
        {
            MatchOutcome::Matched => {
                user.password_bcrypt = Some(self.matcher.hash(password).await?);
                user.update_time = Utc::now();
                tx.update_user(user).await.map_err(ApiError::from)?;
                Ok(())
            }
            MatchOutcome::Rejected(err) => {
                warn!(user_id = %user.id, "Password rejected");
                Err(Rejected::Commit(err))
            }
        }
    }
}

/// A failed password step, and whether its writes must survive.
enum Rejected {
    /// Commit the attempt bookkeeping, then fail
    Commit(ApiError),
    /// Roll back and fail
    Abort(ApiError),
}

impl From<ApiError> for Rejected {
    fn from(err: ApiError) -> Self {
        Self::Abort(err)
    }
}

// ============================================================================
// Registration
// ============================================================================

struct RegisterPassword<'a> {
    service: &'a IntermediateService,
    ctx: &'a IntermediateContext,
    password: &'a SecretString,
}

impl RegisterPassword<'_> {
    /// Gates checked before the breach lookup and again before writing.
    async fn check(&self, tx: &mut dyn Transaction, loaded: &Loaded) -> ApiResult<()> {
        let organization_id = loaded.require_organization()?.id;
        loaded.require_method(LoginMethod::Password)?;
        loaded.require_email_verified(tx).await?;
        if loaded.session.password_verified {
            return Err(ApiError::failed_precondition("password has already been verified"));
        }
        linker::match_user_for_registration(tx, organization_id, &loaded.session).await?;
        Ok(())
    }
}

#[async_trait]
impl<'a> TwoPhase for RegisterPassword<'a> {
    type Snapshot = ();
    type Fetched = String;
    type Output = IntermediateSession;

    async fn read(&self, tx: &mut dyn Transaction) -> ApiResult<()> {
        let loaded = load(tx, self.ctx).await?;
        self.check(tx, &loaded).await
    }

    async fn fetch(&self, _snapshot: &()) -> ApiResult<String> {
        let compromised = self
            .service
            .breach_checker
            .is_compromised(self.password)
            .await
            .map_err(|e| ApiError::from_provider("check breached password", e))?;
        if compromised {
            warn!("Refused a breached password");
            return Err(ApiError::PasswordCompromised);
        }
        self.service.matcher.hash(self.password).await
    }

    async fn write(
        &self,
        tx: &mut dyn Transaction,
        _snapshot: (),
        hash: String,
    ) -> ApiResult<IntermediateSession> {
        let loaded = load(tx, self.ctx).await?;
        self.check(tx, &loaded).await?;
        let organization_id = loaded.require_organization()?.id;

        let mut session = loaded.session;
        session.new_user_password_bcrypt = Some(hash);
        session.password_reset_code_verified = false;

        let event = IntermediateSessionEvent::PasswordRegistered {
            intermediate_session_id: session.id,
            organization_id,
        };
        persist(tx, self.ctx, &session, event).await?;

        info!("Password registered");
        Ok(session)
    }
}
