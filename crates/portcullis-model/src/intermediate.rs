//! Intermediate sessions
//!
//! An intermediate session is the pre-authentication record a caller
//! carries between requests. Each login step adds evidence to it (a verified
//! email, a matched password, a redeemed OAuth identity) and the first
//! credential verified becomes its primary auth factor. Once the evidence
//! satisfies the organization's policy, the intermediate session is
//! exchanged exactly once for a [`Session`](crate::Session) and is dead
//! afterwards.
//!
//! ```text
//! Created ──(factor verified)*──→ PrimaryFactorFixed ──(exchange)──→ Exchanged
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::login::LoginMethod;

/// Returned when a stored enum name is not recognized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    /// Which enum was being parsed
    pub kind: &'static str,
    /// The offending text
    pub value: String,
}

/// Social OAuth providers with a platform default app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthProvider {
    Google,
    Microsoft,
    Github,
}

impl OAuthProvider {
    pub const ALL: [OAuthProvider; 3] = [Self::Google, Self::Microsoft, Self::Github];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Github => "github",
        }
    }

    /// Login method that gates this provider.
    pub fn login_method(&self) -> LoginMethod {
        match self {
            Self::Google => LoginMethod::Google,
            Self::Microsoft => LoginMethod::Microsoft,
            Self::Github => LoginMethod::Github,
        }
    }

    /// Primary auth factor recorded when this provider is redeemed first.
    pub fn primary_auth_factor(&self) -> PrimaryAuthFactor {
        match self {
            Self::Google => PrimaryAuthFactor::Google,
            Self::Microsoft => PrimaryAuthFactor::Microsoft,
            Self::Github => PrimaryAuthFactor::Github,
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Self::Google),
            "microsoft" => Ok(Self::Microsoft),
            "github" => Ok(Self::Github),
            other => Err(UnknownVariant {
                kind: "oauth provider",
                value: other.to_string(),
            }),
        }
    }
}

/// What an OAuth state was issued for: a social provider or an
/// organization's OIDC connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OAuthTarget {
    Provider { provider: OAuthProvider },
    OidcConnection { connection_id: Uuid },
}

impl OAuthTarget {
    pub fn login_method(&self) -> LoginMethod {
        match self {
            Self::Provider { provider } => provider.login_method(),
            Self::OidcConnection { .. } => LoginMethod::Oidc,
        }
    }

    pub fn primary_auth_factor(&self) -> PrimaryAuthFactor {
        match self {
            Self::Provider { provider } => provider.primary_auth_factor(),
            Self::OidcConnection { .. } => PrimaryAuthFactor::Oidc,
        }
    }
}

impl From<OAuthProvider> for OAuthTarget {
    fn from(provider: OAuthProvider) -> Self {
        Self::Provider { provider }
    }
}

/// The first credential type verified on an intermediate session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryAuthFactor {
    Password,
    Email,
    Google,
    Microsoft,
    Github,
    Saml,
    Oidc,
    Passkey,
    AuthenticatorApp,
}

impl PrimaryAuthFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Email => "email",
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Github => "github",
            Self::Saml => "saml",
            Self::Oidc => "oidc",
            Self::Passkey => "passkey",
            Self::AuthenticatorApp => "authenticator_app",
        }
    }
}

impl fmt::Display for PrimaryAuthFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimaryAuthFactor {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(Self::Password),
            "email" => Ok(Self::Email),
            "google" => Ok(Self::Google),
            "microsoft" => Ok(Self::Microsoft),
            "github" => Ok(Self::Github),
            "saml" => Ok(Self::Saml),
            "oidc" => Ok(Self::Oidc),
            "passkey" => Ok(Self::Passkey),
            "authenticator_app" => Ok(Self::AuthenticatorApp),
            other => Err(UnknownVariant {
                kind: "primary auth factor",
                value: other.to_string(),
            }),
        }
    }
}

/// Pre-authentication state accumulated across login steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntermediateSession {
    /// Unique identifier
    pub id: Uuid,

    /// Owning project
    pub project_id: Uuid,

    /// Organization the caller is logging into, once known
    pub organization_id: Option<Uuid>,

    /// Email the caller claims or that a provider attested
    pub email: Option<String>,

    /// Whether the caller completed an email verification challenge
    #[serde(default)]
    pub email_verification_challenge_completed: bool,

    /// Digest of the outstanding email verification code
    pub email_verification_challenge_sha256: Option<Vec<u8>>,

    /// Whether a password was matched on this session
    #[serde(default)]
    pub password_verified: bool,

    /// Whether a passkey assertion was verified on this session
    #[serde(default)]
    pub passkey_verified: bool,

    /// Whether an authenticator app code was verified on this session
    #[serde(default)]
    pub authenticator_app_verified: bool,

    /// First credential type verified; set once
    pub primary_auth_factor: Option<PrimaryAuthFactor>,

    /// Digest of the outstanding OAuth state
    pub oauth_state_sha256: Option<Vec<u8>>,

    /// What the outstanding OAuth state was issued for
    pub oauth_state_target: Option<OAuthTarget>,

    /// Redeemed Google subject
    pub google_user_id: Option<String>,

    /// Google Workspace hosted domain of the redeemed account
    pub google_hosted_domain: Option<String>,

    /// Redeemed Microsoft subject
    pub microsoft_user_id: Option<String>,

    /// Redeemed GitHub subject
    pub github_user_id: Option<String>,

    /// SAML connection whose assertion was validated
    pub verified_saml_connection_id: Option<Uuid>,

    /// OIDC connection whose code was redeemed
    pub verified_oidc_connection_id: Option<Uuid>,

    /// Display name reported by an identity provider
    pub display_name: Option<String>,

    /// Profile picture reported by an identity provider
    pub profile_picture_url: Option<String>,

    /// Digest of the outstanding password reset code
    pub password_reset_code_sha256: Option<Vec<u8>>,

    /// Whether a password reset code was verified and not yet consumed
    #[serde(default)]
    pub password_reset_code_verified: bool,

    /// Bcrypt hash staged by password registration, attached at exchange
    #[serde(skip_serializing)]
    pub new_user_password_bcrypt: Option<String>,

    /// When the intermediate session was created
    pub create_time: DateTime<Utc>,

    /// When the intermediate session stops being usable
    pub expire_time: DateTime<Utc>,

    /// When the intermediate session was exchanged for a session
    pub exchange_time: Option<DateTime<Utc>>,
}

impl IntermediateSession {
    /// Creates an empty intermediate session valid for `ttl`.
    pub fn new(project_id: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            project_id,
            organization_id: None,
            email: None,
            email_verification_challenge_completed: false,
            email_verification_challenge_sha256: None,
            password_verified: false,
            passkey_verified: false,
            authenticator_app_verified: false,
            primary_auth_factor: None,
            oauth_state_sha256: None,
            oauth_state_target: None,
            google_user_id: None,
            google_hosted_domain: None,
            microsoft_user_id: None,
            github_user_id: None,
            verified_saml_connection_id: None,
            verified_oidc_connection_id: None,
            display_name: None,
            profile_picture_url: None,
            password_reset_code_sha256: None,
            password_reset_code_verified: false,
            new_user_password_bcrypt: None,
            create_time: now,
            expire_time: now + ttl,
            exchange_time: None,
        }
    }

    /// Bind the session to an organization.
    pub fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Set the caller's email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time <= now
    }

    pub fn is_exchanged(&self) -> bool {
        self.exchange_time.is_some()
    }

    /// Record `factor` as the primary auth factor unless one is already fixed.
    ///
    /// Returns `true` when this call fixed the factor.
    pub fn fix_primary_auth_factor(&mut self, factor: PrimaryAuthFactor) -> bool {
        if self.primary_auth_factor.is_some() {
            return false;
        }
        self.primary_auth_factor = Some(factor);
        true
    }

    /// Redeemed subject for `provider`.
    pub fn provider_subject(&self, provider: OAuthProvider) -> Option<&str> {
        match provider {
            OAuthProvider::Google => self.google_user_id.as_deref(),
            OAuthProvider::Microsoft => self.microsoft_user_id.as_deref(),
            OAuthProvider::Github => self.github_user_id.as_deref(),
        }
    }

    pub fn set_provider_subject(&mut self, provider: OAuthProvider, subject: String) {
        match provider {
            OAuthProvider::Google => self.google_user_id = Some(subject),
            OAuthProvider::Microsoft => self.microsoft_user_id = Some(subject),
            OAuthProvider::Github => self.github_user_id = Some(subject),
        }
    }

    /// Redeemed provider subjects, in a fixed order.
    pub fn provider_subjects(&self) -> impl Iterator<Item = (OAuthProvider, &str)> {
        OAuthProvider::ALL
            .into_iter()
            .filter_map(move |p| self.provider_subject(p).map(|s| (p, s)))
    }

    /// Whether the evidence for the fixed primary factor is present.
    pub fn primary_factor_satisfied(&self) -> bool {
        match self.primary_auth_factor {
            None => false,
            Some(PrimaryAuthFactor::Password) => self.password_verified,
            Some(PrimaryAuthFactor::Email) => self.email_verification_challenge_completed,
            Some(PrimaryAuthFactor::Google) => self.google_user_id.is_some(),
            Some(PrimaryAuthFactor::Microsoft) => self.microsoft_user_id.is_some(),
            Some(PrimaryAuthFactor::Github) => self.github_user_id.is_some(),
            Some(PrimaryAuthFactor::Saml) => self.verified_saml_connection_id.is_some(),
            Some(PrimaryAuthFactor::Oidc) => self.verified_oidc_connection_id.is_some(),
            Some(PrimaryAuthFactor::Passkey) => self.passkey_verified,
            Some(PrimaryAuthFactor::AuthenticatorApp) => self.authenticator_app_verified,
        }
    }

    /// Whether a second factor other than the primary one was verified.
    pub fn second_factor_satisfied(&self) -> bool {
        let passkey = self.passkey_verified && self.primary_auth_factor != Some(PrimaryAuthFactor::Passkey);
        let app = self.authenticator_app_verified
            && self.primary_auth_factor != Some(PrimaryAuthFactor::AuthenticatorApp);
        passkey || app
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> IntermediateSession {
        IntermediateSession::new(Uuid::now_v7(), Duration::minutes(15))
    }

    #[test]
    fn test_primary_factor_is_fixed_once() {
        let mut s = session();
        assert!(s.fix_primary_auth_factor(PrimaryAuthFactor::Google));
        assert!(!s.fix_primary_auth_factor(PrimaryAuthFactor::Password));
        assert_eq!(s.primary_auth_factor, Some(PrimaryAuthFactor::Google));
    }

    #[test]
    fn test_primary_factor_satisfied() {
        let mut s = session();
        assert!(!s.primary_factor_satisfied());

        s.fix_primary_auth_factor(PrimaryAuthFactor::Password);
        assert!(!s.primary_factor_satisfied());

        s.password_verified = true;
        assert!(s.primary_factor_satisfied());
    }

    #[test]
    fn test_second_factor_excludes_primary() {
        let mut s = session();
        s.fix_primary_auth_factor(PrimaryAuthFactor::Passkey);
        s.passkey_verified = true;
        assert!(!s.second_factor_satisfied());

        s.authenticator_app_verified = true;
        assert!(s.second_factor_satisfied());
    }

    #[test]
    fn test_expiry() {
        let s = session();
        assert!(!s.is_expired(Utc::now()));
        assert!(s.is_expired(s.expire_time));
    }

    #[test]
    fn test_factor_round_trips_through_str() {
        for factor in [PrimaryAuthFactor::AuthenticatorApp, PrimaryAuthFactor::Oidc] {
            assert_eq!(factor.as_str().parse::<PrimaryAuthFactor>(), Ok(factor));
        }
        assert!("sms".parse::<PrimaryAuthFactor>().is_err());
    }

    #[test]
    fn test_provider_subjects() {
        let mut s = session();
        s.set_provider_subject(OAuthProvider::Github, "42".into());
        let subjects: Vec<_> = s.provider_subjects().collect();
        assert_eq!(subjects, vec![(OAuthProvider::Github, "42")]);
    }
}
