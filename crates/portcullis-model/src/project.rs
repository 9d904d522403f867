//! Project domain models
//!
//! A project is the tenant root. Everything an end user touches during login
//! (organizations, users, intermediate sessions, verified emails) is scoped
//! to exactly one project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intermediate::OAuthProvider;
use crate::login::LoginMethods;

/// Tenant-supplied OAuth application.
///
/// The client secret is only ever held encrypted at rest; it is decrypted
/// through the key-management service immediately before a code exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientCredentials {
    /// OAuth client id registered with the provider
    pub client_id: String,

    /// Client secret encrypted by the key-management service
    pub client_secret_ciphertext: Vec<u8>,
}

impl OAuthClientCredentials {
    /// Create tenant credentials from a client id and encrypted secret.
    pub fn new(client_id: impl Into<String>, client_secret_ciphertext: impl Into<Vec<u8>>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret_ciphertext: client_secret_ciphertext.into(),
        }
    }
}

/// A customer project.
///
/// # Examples
///
/// ```
/// use portcullis_model::Project;
///
/// let project = Project::new("Acme");
/// assert!(!project.logins_disabled);
/// assert!(project.email_quota_daily.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier for the project
    pub id: Uuid,

    /// Name shown to end users, e.g. in email subjects
    pub display_name: String,

    /// Global kill switch for every login in the project
    #[serde(default)]
    pub logins_disabled: bool,

    /// Login methods enabled at the project level
    #[serde(default)]
    pub login_methods: LoginMethods,

    /// Tenant Google OAuth app; `None` uses the platform default app
    pub google_oauth_client: Option<OAuthClientCredentials>,

    /// Tenant Microsoft OAuth app; `None` uses the platform default app
    pub microsoft_oauth_client: Option<OAuthClientCredentials>,

    /// Tenant GitHub OAuth app; `None` uses the platform default app
    pub github_oauth_client: Option<OAuthClientCredentials>,

    /// Daily outbound email cap; `None` means the platform default
    pub email_quota_daily: Option<i64>,

    /// Domain used for the `noreply@` sender address
    pub email_send_from_domain: String,

    /// When the project was created
    pub create_time: DateTime<Utc>,

    /// When the project was last updated
    pub update_time: DateTime<Utc>,
}

impl Project {
    /// Creates a project with every login method disabled.
    pub fn new(display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            display_name: display_name.into(),
            logins_disabled: false,
            login_methods: LoginMethods::default(),
            google_oauth_client: None,
            microsoft_oauth_client: None,
            github_oauth_client: None,
            email_quota_daily: None,
            email_send_from_domain: "mail.portcullis.dev".to_string(),
            create_time: now,
            update_time: now,
        }
    }

    /// Set the enabled login methods.
    pub fn with_login_methods(mut self, login_methods: LoginMethods) -> Self {
        self.login_methods = login_methods;
        self
    }

    /// Set the daily email quota.
    pub fn with_email_quota_daily(mut self, quota: i64) -> Self {
        self.email_quota_daily = Some(quota);
        self
    }

    /// Configure a tenant OAuth app for `provider`.
    pub fn with_oauth_client(mut self, provider: OAuthProvider, credentials: OAuthClientCredentials) -> Self {
        match provider {
            OAuthProvider::Google => self.google_oauth_client = Some(credentials),
            OAuthProvider::Microsoft => self.microsoft_oauth_client = Some(credentials),
            OAuthProvider::Github => self.github_oauth_client = Some(credentials),
        }
        self
    }

    /// Tenant OAuth app for `provider`, if one is configured.
    pub fn oauth_client(&self, provider: OAuthProvider) -> Option<&OAuthClientCredentials> {
        match provider {
            OAuthProvider::Google => self.google_oauth_client.as_ref(),
            OAuthProvider::Microsoft => self.microsoft_oauth_client.as_ref(),
            OAuthProvider::Github => self.github_oauth_client.as_ref(),
        }
    }

    /// Effective daily email quota given the platform default.
    pub fn effective_email_quota(&self, default_quota: i64) -> i64 {
        self.email_quota_daily.unwrap_or(default_quota)
    }

    /// Sender address for transactional email.
    pub fn email_from_address(&self) -> String {
        format!("noreply@{}", self.email_send_from_domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_client_lookup() {
        let project = Project::new("Acme").with_oauth_client(
            OAuthProvider::Github,
            OAuthClientCredentials::new("gh-client", b"sealed".to_vec()),
        );

        assert!(project.oauth_client(OAuthProvider::Google).is_none());
        assert_eq!(
            project.oauth_client(OAuthProvider::Github).map(|c| c.client_id.as_str()),
            Some("gh-client")
        );
    }

    #[test]
    fn test_effective_email_quota() {
        let project = Project::new("Acme");
        assert_eq!(project.effective_email_quota(1000), 1000);

        let project = project.with_email_quota_daily(3);
        assert_eq!(project.effective_email_quota(1000), 3);
    }

    #[test]
    fn test_email_from_address() {
        let mut project = Project::new("Acme");
        project.email_send_from_domain = "auth.acme.test".into();
        assert_eq!(project.email_from_address(), "noreply@auth.acme.test");
    }
}
