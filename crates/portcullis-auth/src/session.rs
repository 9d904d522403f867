//! Session issuance
//!
//! Creates the long-lived [`Session`] an intermediate session is exchanged
//! for. The refresh token is 32 random bytes; only its SHA-256 digest is
//! stored and the plaintext is returned exactly once, to the caller of
//! [`issue_session`].
//!
//! Access tokens are minted separately through an [`AccessTokenIssuer`],
//! after the exchange transaction has committed.

use async_trait::async_trait;
use chrono::Duration;
use portcullis_audit::{Actor, SessionEvent};
use portcullis_model::{IntermediateSession, Session, User};
use portcullis_store::Transaction;
use tracing::info;

use crate::audit::record;
use crate::error::{ApiError, ApiResult};
use crate::tokens::{SecretToken, SecretTokenKind};

/// A session together with its one-time refresh token plaintext.
pub struct IssuedSession {
    pub session: Session,
    pub refresh_token: String,
}

impl std::fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSession")
            .field("session", &self.session)
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Mints access tokens for a session identified by its refresh token.
#[async_trait]
pub trait AccessTokenIssuer: Send + Sync {
    async fn issue_access_token(&self, refresh_token: &str) -> ApiResult<String>;
}

/// Create a session for `user` inside `tx` and record `sessions.create`.
///
/// The caller has already checked every exchange precondition and marks the
/// intermediate session exchanged in the same transaction.
pub async fn issue_session(
    tx: &mut dyn Transaction,
    actor: Actor,
    intermediate: &IntermediateSession,
    user: &User,
    user_created: bool,
    ttl: Duration,
) -> ApiResult<IssuedSession> {
    let primary_auth_factor = intermediate
        .primary_auth_factor
        .ok_or_else(|| ApiError::failed_precondition("no primary auth factor has been verified"))?;

    let (refresh_token, digest) = SecretToken::generate(SecretTokenKind::SessionRefreshToken).into_parts();
    let session = Session::new(user.id, digest, primary_auth_factor, ttl);
    tx.create_session(&session).await?;

    let event = SessionEvent::Created {
        session_id: session.id,
        user_id: user.id,
        organization_id: user.organization_id,
        intermediate_session_id: intermediate.id,
        primary_auth_factor,
        user_created,
    };
    record(tx, event.to_event(intermediate.project_id, actor)).await?;

    info!(
        session_id = %session.id,
        user_id = %user.id,
        %primary_auth_factor,
        user_created,
        "Session issued"
    );
    Ok(IssuedSession {
        session,
        refresh_token,
    })
}
