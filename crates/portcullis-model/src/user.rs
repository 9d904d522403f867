//! User and verified-email records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intermediate::OAuthProvider;

/// An end user of one organization.
///
/// Email is unique within the organization. Deactivated users are never
/// matched by any login flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier for the user
    pub id: Uuid,

    /// Owning organization
    pub organization_id: Uuid,

    /// Email address (unique within the organization)
    pub email: String,

    /// Bcrypt hash of the user's password, if one is configured
    #[serde(skip_serializing)]
    pub password_bcrypt: Option<String>,

    /// Linked Google subject
    pub google_user_id: Option<String>,

    /// Linked Microsoft subject
    pub microsoft_user_id: Option<String>,

    /// Linked GitHub subject
    pub github_user_id: Option<String>,

    /// Consecutive mismatched password attempts
    #[serde(default)]
    pub failed_password_attempts: i32,

    /// Password checks are refused until this instant
    pub password_lockout_expire_time: Option<DateTime<Utc>>,

    /// Whether the user owns the organization
    #[serde(default)]
    pub is_owner: bool,

    /// Display name
    pub display_name: Option<String>,

    /// Profile picture URL
    pub profile_picture_url: Option<String>,

    /// When the user was deactivated
    pub deactivate_time: Option<DateTime<Utc>>,

    /// When the user was created
    pub create_time: DateTime<Utc>,

    /// When the user was last updated
    pub update_time: DateTime<Utc>,
}

impl User {
    /// Creates an active user with no credentials.
    pub fn new(organization_id: Uuid, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            organization_id,
            email: email.into(),
            password_bcrypt: None,
            google_user_id: None,
            microsoft_user_id: None,
            github_user_id: None,
            failed_password_attempts: 0,
            password_lockout_expire_time: None,
            is_owner: false,
            display_name: None,
            profile_picture_url: None,
            deactivate_time: None,
            create_time: now,
            update_time: now,
        }
    }

    /// Set the bcrypt password hash.
    pub fn with_password_bcrypt(mut self, hash: impl Into<String>) -> Self {
        self.password_bcrypt = Some(hash.into());
        self
    }

    /// Link a provider subject.
    pub fn with_provider_subject(mut self, provider: OAuthProvider, subject: impl Into<String>) -> Self {
        self.set_provider_subject(provider, subject.into());
        self
    }

    /// Whether the user can still log in.
    pub fn is_active(&self) -> bool {
        self.deactivate_time.is_none()
    }

    /// Whether a password lockout is in effect at `now`.
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.password_lockout_expire_time
            .map(|expire| expire > now)
            .unwrap_or(false)
    }

    /// Linked subject for `provider`.
    pub fn provider_subject(&self, provider: OAuthProvider) -> Option<&str> {
        match provider {
            OAuthProvider::Google => self.google_user_id.as_deref(),
            OAuthProvider::Microsoft => self.microsoft_user_id.as_deref(),
            OAuthProvider::Github => self.github_user_id.as_deref(),
        }
    }

    /// Link `subject` for `provider`, replacing any previous value.
    pub fn set_provider_subject(&mut self, provider: OAuthProvider, subject: String) {
        match provider {
            OAuthProvider::Google => self.google_user_id = Some(subject),
            OAuthProvider::Microsoft => self.microsoft_user_id = Some(subject),
            OAuthProvider::Github => self.github_user_id = Some(subject),
        }
    }
}

/// Project-scoped fact that an email was confirmed by some provider.
///
/// Not tied to a user: it exists so that a later login with the same
/// provider subject counts as email-verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedEmail {
    /// Unique identifier
    pub id: Uuid,

    /// Owning project
    pub project_id: Uuid,

    /// The verified address
    pub email: String,

    /// Provider that attested the address; `None` for an email challenge
    pub provider: Option<OAuthProvider>,

    /// Provider subject that attested the address
    pub provider_subject: Option<String>,

    /// When the address was verified
    pub create_time: DateTime<Utc>,
}

impl VerifiedEmail {
    /// Record that the project saw `email` verified by an email challenge.
    pub fn from_email_challenge(project_id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            project_id,
            email: email.into(),
            provider: None,
            provider_subject: None,
            create_time: Utc::now(),
        }
    }

    /// Record that `provider` attested `email` for `subject`.
    pub fn from_provider(
        project_id: Uuid,
        email: impl Into<String>,
        provider: OAuthProvider,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            project_id,
            email: email.into(),
            provider: Some(provider),
            provider_subject: Some(subject.into()),
            create_time: Utc::now(),
        }
    }
}
