//! Login-method toggles for projects and organizations
//!
//! A login method may only be exercised when it is enabled at the project
//! level and, once an intermediate session is bound to an organization, at
//! the organization level as well.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A way an end user can prove their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    /// Email and password
    Password,
    /// Sign in with Google
    Google,
    /// Sign in with Microsoft
    Microsoft,
    /// Sign in with GitHub
    Github,
    /// Email verification code
    Email,
    /// Enterprise SAML identity provider
    Saml,
    /// Enterprise OpenID Connect identity provider
    Oidc,
    /// TOTP authenticator app
    AuthenticatorApp,
    /// WebAuthn passkey
    Passkey,
}

impl LoginMethod {
    /// Stable lowercase name, used in error messages and audit details.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Github => "github",
            Self::Email => "email",
            Self::Saml => "saml",
            Self::Oidc => "oidc",
            Self::AuthenticatorApp => "authenticator_app",
            Self::Passkey => "passkey",
        }
    }
}

impl fmt::Display for LoginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of enabled login methods.
///
/// Everything is disabled by default; tenants opt in per method.
///
/// # Examples
///
/// ```
/// use portcullis_model::{LoginMethod, LoginMethods};
///
/// let mut methods = LoginMethods::default();
/// assert!(!methods.allows(LoginMethod::Google));
///
/// methods.enable(LoginMethod::Google);
/// assert!(methods.allows(LoginMethod::Google));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginMethods {
    /// Log in with email and password
    #[serde(default)]
    pub password: bool,

    /// Log in with Google
    #[serde(default)]
    pub google: bool,

    /// Log in with Microsoft
    #[serde(default)]
    pub microsoft: bool,

    /// Log in with GitHub
    #[serde(default)]
    pub github: bool,

    /// Log in with an emailed verification code
    #[serde(default)]
    pub email: bool,

    /// Log in through a SAML connection
    #[serde(default)]
    pub saml: bool,

    /// Log in through an OIDC connection
    #[serde(default)]
    pub oidc: bool,

    /// Authenticator app as a second factor
    #[serde(default)]
    pub authenticator_app: bool,

    /// Passkey as a second factor
    #[serde(default)]
    pub passkey: bool,
}

impl LoginMethods {
    /// Every method enabled.
    pub fn all() -> Self {
        Self {
            password: true,
            google: true,
            microsoft: true,
            github: true,
            email: true,
            saml: true,
            oidc: true,
            authenticator_app: true,
            passkey: true,
        }
    }

    /// Whether `method` is enabled.
    pub fn allows(&self, method: LoginMethod) -> bool {
        *self.slot(method)
    }

    /// Enable a method.
    pub fn enable(&mut self, method: LoginMethod) {
        *self.slot_mut(method) = true;
    }

    /// Disable a method.
    pub fn disable(&mut self, method: LoginMethod) {
        *self.slot_mut(method) = false;
    }

    /// Builder-style variant of [`LoginMethods::enable`].
    pub fn with(mut self, method: LoginMethod) -> Self {
        self.enable(method);
        self
    }

    /// Whether some second factor is available, which `require_mfa` depends on.
    pub fn has_second_factor(&self) -> bool {
        self.authenticator_app || self.passkey
    }

    fn slot(&self, method: LoginMethod) -> &bool {
        match method {
            LoginMethod::Password => &self.password,
            LoginMethod::Google => &self.google,
            LoginMethod::Microsoft => &self.microsoft,
            LoginMethod::Github => &self.github,
            LoginMethod::Email => &self.email,
            LoginMethod::Saml => &self.saml,
            LoginMethod::Oidc => &self.oidc,
            LoginMethod::AuthenticatorApp => &self.authenticator_app,
            LoginMethod::Passkey => &self.passkey,
        }
    }

    fn slot_mut(&mut self, method: LoginMethod) -> &mut bool {
        match method {
            LoginMethod::Password => &mut self.password,
            LoginMethod::Google => &mut self.google,
            LoginMethod::Microsoft => &mut self.microsoft,
            LoginMethod::Github => &mut self.github,
            LoginMethod::Email => &mut self.email,
            LoginMethod::Saml => &mut self.saml,
            LoginMethod::Oidc => &mut self.oidc,
            LoginMethod::AuthenticatorApp => &mut self.authenticator_app,
            LoginMethod::Passkey => &mut self.passkey,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_disables_everything() {
        let methods = LoginMethods::default();
        assert!(!methods.allows(LoginMethod::Password));
        assert!(!methods.allows(LoginMethod::Passkey));
        assert!(!methods.has_second_factor());
    }

    #[test]
    fn test_enable_disable() {
        let mut methods = LoginMethods::default().with(LoginMethod::Saml);
        assert!(methods.saml);
        methods.disable(LoginMethod::Saml);
        assert!(!methods.allows(LoginMethod::Saml));
    }

    #[test]
    fn test_second_factor() {
        let methods = LoginMethods::default().with(LoginMethod::Passkey);
        assert!(methods.has_second_factor());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&LoginMethod::AuthenticatorApp).unwrap();
        assert_eq!(json, "\"authenticator_app\"");
    }
}
