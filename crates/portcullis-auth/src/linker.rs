//! Identity linking
//!
//! Finds the user a verified identity signal refers to. Matching is scoped
//! to one organization, except for direct email and password login, which
//! searches the whole project and only succeeds on a unique candidate.
//! Deactivated users are never returned.

use portcullis_model::{IntermediateSession, User};
use portcullis_store::Transaction;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Active user of `organization_id` with `email`.
pub async fn match_user_by_email(
    tx: &mut dyn Transaction,
    organization_id: Uuid,
    email: &str,
) -> ApiResult<Option<User>> {
    Ok(tx
        .get_user_by_email(organization_id, email)
        .await?
        .filter(User::is_active))
}

/// User a password registration on `session` would attach to.
///
/// Fails when a password already exists for the target (on the user, or
/// staged earlier on this session) and no verified reset code licenses
/// replacing it.
pub async fn match_user_for_registration(
    tx: &mut dyn Transaction,
    organization_id: Uuid,
    session: &IntermediateSession,
) -> ApiResult<Option<User>> {
    let email = session
        .email
        .as_deref()
        .ok_or_else(|| ApiError::failed_precondition("intermediate session has no email"))?;

    let user = match_user_by_email(tx, organization_id, email).await?;
    let has_password = session.new_user_password_bcrypt.is_some()
        || user.as_ref().is_some_and(|u| u.password_bcrypt.is_some());

    if has_password && !session.password_reset_code_verified {
        return Err(ApiError::failed_precondition(
            "a password is already configured; verify a password reset code to replace it",
        ));
    }
    Ok(user)
}

/// The single user of `project_id` that can log in with a password as
/// `email`.
///
/// Zero and several candidates fail identically so the response does not
/// reveal whether the email exists.
pub async fn match_unique_user_for_password_login(
    tx: &mut dyn Transaction,
    project_id: Uuid,
    email: &str,
) -> ApiResult<User> {
    let mut candidates: Vec<User> = tx
        .list_password_login_candidates(project_id, email)
        .await?
        .into_iter()
        .filter(|u| u.is_active() && u.password_bcrypt.is_some())
        .collect();

    if candidates.len() != 1 {
        debug!(candidates = candidates.len(), "No unique password login candidate");
        return Err(ApiError::PasswordsUnavailableForEmail);
    }
    Ok(candidates.remove(0))
}

/// User an exchange of `session` resolves to: a user linked to one of the
/// session's provider subjects first, then a user with the session's email.
pub async fn match_user_for_exchange(
    tx: &mut dyn Transaction,
    organization_id: Uuid,
    session: &IntermediateSession,
) -> ApiResult<Option<User>> {
    for (provider, subject) in session.provider_subjects() {
        if let Some(user) = tx
            .get_user_by_provider_subject(organization_id, provider, subject)
            .await?
            .filter(User::is_active)
        {
            return Ok(Some(user));
        }
    }

    match session.email.as_deref() {
        Some(email) => match_user_by_email(tx, organization_id, email).await,
        None => Ok(None),
    }
}
