//! Access token claims
//!
//! Claims carried by the short-lived access tokens minted for a session.
//! Identifiers are rendered in their prefixed textual form so that tokens
//! can be inspected without knowing the id scheme.

use chrono::{DateTime, Duration, Utc};
use portcullis_model::{IdFormat, PrimaryAuthFactor, Session, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard JWT claims with session context.
///
/// # Example
///
/// ```rust,no_run
/// use portcullis_auth::claims::AccessTokenClaims;
/// # use portcullis_model::{PrimaryAuthFactor, Session, User};
/// # use uuid::Uuid;
///
/// let user = User::new(Uuid::now_v7(), "user@example.com");
/// let session = Session::new(user.id, vec![0; 32], PrimaryAuthFactor::Password, chrono::Duration::days(7));
/// let claims = AccessTokenClaims::new(&session, &user, "portcullis", chrono::Duration::minutes(5));
/// assert_eq!(claims.user_id(), Some(user.id));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    // Standard JWT claims (RFC 7519)
    /// Subject (`user_…`)
    pub sub: String,

    /// Issuer
    pub iss: String,

    /// Audience
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// JWT ID
    pub jti: String,

    /// Session the token was minted for (`session_…`)
    pub session: String,

    /// Organization of the user (`org_…`)
    pub organization: String,

    /// User email
    pub email: String,

    /// Credential type that authenticated the session
    pub primary_auth_factor: PrimaryAuthFactor,
}

impl AccessTokenClaims {
    /// Claims for `user` in `session`, valid for `duration` from now.
    pub fn new(session: &Session, user: &User, issuer: impl Into<String>, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: IdFormat::User.format(user.id),
            iss: issuer.into(),
            aud: Vec::new(),
            exp: (now + duration).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::now_v7().to_string(),
            session: IdFormat::Session.format(session.id),
            organization: IdFormat::Organization.format(user.organization_id),
            email: user.email.clone(),
            primary_auth_factor: session.primary_auth_factor,
        }
    }

    /// Set the audience.
    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.aud = audience;
        self
    }

    /// Get the user ID as UUID.
    pub fn user_id(&self) -> Option<Uuid> {
        IdFormat::User.parse(&self.sub).ok()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        IdFormat::Session.parse(&self.session).ok()
    }

    pub fn organization_id(&self) -> Option<Uuid> {
        IdFormat::Organization.parse(&self.organization).ok()
    }

    /// Check if the token is expired.
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    /// Get expiration as DateTime.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}
