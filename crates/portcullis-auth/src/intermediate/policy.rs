//! Loading and gating shared by every step.

use chrono::Utc;
use portcullis_audit::IntermediateSessionEvent;
use portcullis_model::{IntermediateSession, LoginMethod, Organization, Project};
use portcullis_store::Transaction;
use tracing::debug;

use super::IntermediateContext;
use crate::audit::record;
use crate::error::{ApiError, ApiResult};

/// An intermediate session with its tenants, as of one transaction.
pub(super) struct Loaded {
    pub session: IntermediateSession,
    pub project: Project,
    pub organization: Option<Organization>,
}

/// Load the session named by `ctx` and reject it when it can no longer
/// make progress.
pub(super) async fn load(tx: &mut dyn Transaction, ctx: &IntermediateContext) -> ApiResult<Loaded> {
    let session = tx
        .get_intermediate_session(ctx.project_id, ctx.intermediate_session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("intermediate session"))?;

    if session.is_exchanged() {
        return Err(ApiError::failed_precondition(
            "intermediate session has already been exchanged",
        ));
    }
    if session.is_expired(Utc::now()) {
        return Err(ApiError::unauthenticated("intermediate session has expired"));
    }

    let project = tx
        .get_project(ctx.project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("project"))?;
    if project.logins_disabled {
        return Err(ApiError::failed_precondition("logins are disabled for this project"));
    }

    let organization = match session.organization_id {
        Some(organization_id) => {
            let organization = tx
                .get_organization(project.id, organization_id)
                .await?
                .ok_or_else(|| ApiError::not_found("organization"))?;
            if organization.logins_disabled {
                return Err(ApiError::failed_precondition(
                    "logins are disabled for this organization",
                ));
            }
            Some(organization)
        }
        None => None,
    };

    Ok(Loaded {
        session,
        project,
        organization,
    })
}

/// Write `session` back and record `event` for it.
pub(super) async fn persist(
    tx: &mut dyn Transaction,
    ctx: &IntermediateContext,
    session: &IntermediateSession,
    event: IntermediateSessionEvent,
) -> ApiResult<()> {
    tx.update_intermediate_session(session).await?;
    record(tx, event.to_event(ctx.project_id, ctx.actor())).await?;
    Ok(())
}

/// Reject `method` on `organization`, which may not be bound yet.
pub(super) fn check_organization(organization: &Organization, method: LoginMethod) -> ApiResult<()> {
    if organization.logins_disabled {
        return Err(ApiError::failed_precondition(
            "logins are disabled for this organization",
        ));
    }
    if !organization.login_methods.allows(method) {
        return Err(ApiError::failed_precondition(format!(
            "{} login is not enabled for this organization",
            method
        )));
    }
    Ok(())
}

impl Loaded {
    pub fn require_organization(&self) -> ApiResult<&Organization> {
        self.organization.as_ref().ok_or_else(|| {
            ApiError::failed_precondition("intermediate session is not bound to an organization")
        })
    }

    /// Reject when `method` is disabled for the project or the bound
    /// organization.
    pub fn require_method(&self, method: LoginMethod) -> ApiResult<()> {
        if !self.project.login_methods.allows(method) {
            debug!(%method, "Login method disabled for project");
            return Err(ApiError::failed_precondition(format!(
                "{} login is not enabled for this project",
                method
            )));
        }
        match &self.organization {
            Some(organization) => check_organization(organization, method),
            None => Ok(()),
        }
    }

    /// Reject unless at least one of `methods` is enabled.
    pub fn require_any_method(&self, methods: &[LoginMethod]) -> ApiResult<()> {
        let mut first = None;
        for &method in methods {
            match self.require_method(method) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    first.get_or_insert(err);
                }
            }
        }
        Err(first.unwrap_or_else(|| ApiError::failed_precondition("no login method is enabled")))
    }

    pub fn allows_method(&self, method: LoginMethod) -> bool {
        self.require_method(method).is_ok()
    }

    /// Bind the session to `organization`, refusing to move it to another.
    pub fn bind_organization(&mut self, organization: &Organization) -> ApiResult<()> {
        match self.session.organization_id {
            Some(bound) if bound != organization.id => Err(ApiError::invalid_argument(
                "intermediate session is bound to a different organization",
            )),
            _ => {
                self.session.organization_id = Some(organization.id);
                self.organization = Some(organization.clone());
                Ok(())
            }
        }
    }

    /// Set the session email, or check it against the one already set.
    pub fn bind_email(&mut self, email: &str) -> ApiResult<()> {
        match self.session.email.as_deref() {
            Some(existing) if existing != email => Err(ApiError::invalid_argument(
                "email does not match intermediate session email",
            )),
            Some(_) => Ok(()),
            None => {
                self.session.email = Some(email.to_string());
                Ok(())
            }
        }
    }

    /// Whether the session email counts as verified.
    ///
    /// A completed email challenge, an accepted SAML assertion or a redeemed
    /// OIDC connection verify it outright; a redeemed social provider only
    /// does if that provider attested this email for this subject.
    pub async fn email_verified(&self, tx: &mut dyn Transaction) -> ApiResult<bool> {
        let session = &self.session;
        if session.email_verification_challenge_completed
            || session.verified_saml_connection_id.is_some()
            || session.verified_oidc_connection_id.is_some()
        {
            return Ok(true);
        }

        let Some(email) = session.email.as_deref() else {
            return Ok(false);
        };
        for (provider, subject) in session.provider_subjects() {
            if tx
                .is_email_verified_by_provider(self.project.id, email, provider, subject)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Reject unless the session email counts as verified.
    pub async fn require_email_verified(&self, tx: &mut dyn Transaction) -> ApiResult<()> {
        if self.email_verified(tx).await? {
            Ok(())
        } else {
            Err(ApiError::failed_precondition("email has not been verified"))
        }
    }
}
