//! Provider configuration.
//!
//! Platform-default OAuth apps, identity provider endpoints, key-management
//! and breach-lookup endpoints, and HTTP timeouts. Configuration is loaded
//! from environment variables with defaults suitable for local development.

use portcullis_model::OAuthProvider;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;

use crate::oauth::{IdentityProviderKind, ProviderSpec};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// A platform-owned OAuth app used when a project has not configured its own.
#[derive(Debug, Clone)]
pub struct OAuthAppConfig {
    /// OAuth client id.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: SecretString,

    /// Platform callback the provider redirects to.
    pub redirect_uri: String,
}

/// Endpoints of one identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    /// Authorization endpoint the user is redirected to.
    pub authorize_url: String,

    /// Token endpoint for code redemption.
    pub token_url: String,

    /// Endpoint returning the user's profile.
    pub userinfo_url: String,

    /// Endpoint listing the user's email addresses (GitHub only).
    pub emails_url: Option<String>,
}

impl ProviderEndpoints {
    /// Public endpoints of `provider`.
    pub fn default_for(provider: OAuthProvider) -> Self {
        match provider {
            OAuthProvider::Google => Self {
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
                emails_url: None,
            },
            OAuthProvider::Microsoft => Self {
                authorize_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
                    .to_string(),
                token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
                userinfo_url: "https://graph.microsoft.com/oidc/userinfo".to_string(),
                emails_url: None,
            },
            OAuthProvider::Github => Self {
                authorize_url: "https://github.com/login/oauth/authorize".to_string(),
                token_url: "https://github.com/login/oauth/access_token".to_string(),
                userinfo_url: "https://api.github.com/user".to_string(),
                emails_url: Some("https://api.github.com/user/emails".to_string()),
            },
        }
    }

    /// Endpoints rooted at `base_url`, for pointing a provider at a test server.
    pub fn rooted_at(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/authorize", base),
            token_url: format!("{}/token", base),
            userinfo_url: format!("{}/userinfo", base),
            emails_url: Some(format!("{}/user/emails", base)),
        }
    }
}

/// Vault transit engine used to decrypt tenant OAuth client secrets.
#[derive(Debug, Clone)]
pub struct KmsConfig {
    /// Vault base URL.
    pub base_url: String,

    /// Vault token.
    pub token: SecretString,

    /// Mount path of the transit engine.
    pub transit_mount: String,

    /// Transit key that encrypts OAuth client secrets.
    pub oauth_client_secret_key: String,
}

impl KmsConfig {
    /// Build a full URL by appending a path to the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

/// Breached-password range API.
#[derive(Debug, Clone)]
pub struct HibpConfig {
    /// Base URL of the range API.
    pub base_url: String,

    /// Whether to consult the range API at all.
    pub enabled: bool,
}

/// Configuration for all external collaborators.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Platform Google app.
    pub google: OAuthAppConfig,

    /// Platform Microsoft app.
    pub microsoft: OAuthAppConfig,

    /// Platform GitHub app.
    pub github: OAuthAppConfig,

    /// Google endpoints.
    pub google_endpoints: ProviderEndpoints,

    /// Microsoft endpoints.
    pub microsoft_endpoints: ProviderEndpoints,

    /// GitHub endpoints.
    pub github_endpoints: ProviderEndpoints,

    /// Key-management service.
    pub kms: KmsConfig,

    /// Breached-password lookup.
    pub hibp: HibpConfig,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum attempts for idempotent requests.
    pub max_retries: u32,
}

fn platform_app(provider: OAuthProvider, callback_base: &str) -> OAuthAppConfig {
    OAuthAppConfig {
        client_id: String::new(),
        client_secret: SecretString::new(String::new()),
        redirect_uri: format!(
            "{}/{}-oauth-callback",
            callback_base.trim_end_matches('/'),
            provider.as_str()
        ),
    }
}

impl Default for ProviderConfig {
    /// Returns default configuration suitable for local development.
    fn default() -> Self {
        let callback_base = "http://localhost:3000";
        Self {
            google: platform_app(OAuthProvider::Google, callback_base),
            microsoft: platform_app(OAuthProvider::Microsoft, callback_base),
            github: platform_app(OAuthProvider::Github, callback_base),
            google_endpoints: ProviderEndpoints::default_for(OAuthProvider::Google),
            microsoft_endpoints: ProviderEndpoints::default_for(OAuthProvider::Microsoft),
            github_endpoints: ProviderEndpoints::default_for(OAuthProvider::Github),
            kms: KmsConfig {
                base_url: "http://localhost:8200".to_string(),
                token: SecretString::new(String::new()),
                transit_mount: "transit".to_string(),
                oauth_client_secret_key: "oauth-client-secrets".to_string(),
            },
            hibp: HibpConfig {
                base_url: "https://api.pwnedpasswords.com".to_string(),
                enabled: true,
            },
            request_timeout_secs: 10,
            max_retries: 3,
        }
    }
}

fn env_app(prefix: &str, default: OAuthAppConfig, callback_base: Option<&str>, provider: OAuthProvider) -> OAuthAppConfig {
    let redirect_uri = std::env::var(format!("{}_REDIRECT_URI", prefix))
        .ok()
        .or_else(|| callback_base.map(|base| platform_app(provider, base).redirect_uri))
        .unwrap_or(default.redirect_uri);

    OAuthAppConfig {
        client_id: std::env::var(format!("{}_CLIENT_ID", prefix)).unwrap_or(default.client_id),
        client_secret: std::env::var(format!("{}_CLIENT_SECRET", prefix))
            .map(SecretString::new)
            .unwrap_or(default.client_secret),
        redirect_uri,
    }
}

impl ProviderConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORTCULLIS_OAUTH_CALLBACK_BASE_URL`: base of the platform OAuth callbacks
    /// - `PORTCULLIS_GOOGLE_CLIENT_ID` / `_CLIENT_SECRET` / `_REDIRECT_URI`: platform Google app
    /// - `PORTCULLIS_MICROSOFT_CLIENT_ID` / `_CLIENT_SECRET` / `_REDIRECT_URI`: platform Microsoft app
    /// - `PORTCULLIS_GITHUB_CLIENT_ID` / `_CLIENT_SECRET` / `_REDIRECT_URI`: platform GitHub app
    /// - `PORTCULLIS_VAULT_URL`: Vault base URL (default: http://localhost:8200)
    /// - `PORTCULLIS_VAULT_TOKEN`: Vault token
    /// - `PORTCULLIS_VAULT_TRANSIT_MOUNT`: transit mount (default: transit)
    /// - `PORTCULLIS_OAUTH_SECRET_KEY_NAME`: transit key for OAuth secrets (default: oauth-client-secrets)
    /// - `PORTCULLIS_HIBP_URL`: range API base URL (default: https://api.pwnedpasswords.com)
    /// - `PORTCULLIS_HIBP_ENABLED`: whether to check breached passwords (default: true)
    /// - `PORTCULLIS_PROVIDER_TIMEOUT_SECS`: request timeout in seconds (default: 10)
    /// - `PORTCULLIS_PROVIDER_MAX_RETRIES`: maximum attempts (default: 3)
    pub fn from_env() -> Self {
        let default = Self::default();
        let callback_base = std::env::var("PORTCULLIS_OAUTH_CALLBACK_BASE_URL").ok();
        let callback_base = callback_base.as_deref();

        Self {
            google: env_app("PORTCULLIS_GOOGLE", default.google, callback_base, OAuthProvider::Google),
            microsoft: env_app(
                "PORTCULLIS_MICROSOFT",
                default.microsoft,
                callback_base,
                OAuthProvider::Microsoft,
            ),
            github: env_app("PORTCULLIS_GITHUB", default.github, callback_base, OAuthProvider::Github),
            google_endpoints: default.google_endpoints,
            microsoft_endpoints: default.microsoft_endpoints,
            github_endpoints: default.github_endpoints,
            kms: KmsConfig {
                base_url: std::env::var("PORTCULLIS_VAULT_URL").unwrap_or(default.kms.base_url),
                token: std::env::var("PORTCULLIS_VAULT_TOKEN")
                    .map(SecretString::new)
                    .unwrap_or(default.kms.token),
                transit_mount: std::env::var("PORTCULLIS_VAULT_TRANSIT_MOUNT")
                    .unwrap_or(default.kms.transit_mount),
                oauth_client_secret_key: std::env::var("PORTCULLIS_OAUTH_SECRET_KEY_NAME")
                    .unwrap_or(default.kms.oauth_client_secret_key),
            },
            hibp: HibpConfig {
                base_url: std::env::var("PORTCULLIS_HIBP_URL").unwrap_or(default.hibp.base_url),
                enabled: std::env::var("PORTCULLIS_HIBP_ENABLED")
                    .map(|s| s != "false" && s != "0")
                    .unwrap_or(default.hibp.enabled),
            },
            request_timeout_secs: std::env::var("PORTCULLIS_PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.request_timeout_secs),
            max_retries: std::env::var("PORTCULLIS_PROVIDER_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.max_retries),
        }
    }

    /// Get the request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Platform app for `provider`.
    pub fn platform_app(&self, provider: OAuthProvider) -> &OAuthAppConfig {
        match provider {
            OAuthProvider::Google => &self.google,
            OAuthProvider::Microsoft => &self.microsoft,
            OAuthProvider::Github => &self.github,
        }
    }

    /// Endpoints and scopes for `provider`.
    pub fn provider_spec(&self, provider: OAuthProvider) -> ProviderSpec {
        let (kind, endpoints, scopes) = match provider {
            OAuthProvider::Google => (
                IdentityProviderKind::Google,
                &self.google_endpoints,
                vec!["openid", "email", "profile"],
            ),
            OAuthProvider::Microsoft => (
                IdentityProviderKind::Microsoft,
                &self.microsoft_endpoints,
                vec!["openid", "email", "profile"],
            ),
            OAuthProvider::Github => (
                IdentityProviderKind::Github,
                &self.github_endpoints,
                vec!["read:user", "user:email"],
            ),
        };
        ProviderSpec {
            kind,
            endpoints: endpoints.clone(),
            scopes: scopes.into_iter().map(String::from).collect(),
        }
    }

    /// Validate that all required configuration is present for production.
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        for (name, app) in [
            ("PORTCULLIS_GOOGLE", &self.google),
            ("PORTCULLIS_MICROSOFT", &self.microsoft),
            ("PORTCULLIS_GITHUB", &self.github),
        ] {
            if app.client_id.is_empty() {
                return Err(ConfigError::MissingEnvVar(format!("{}_CLIENT_ID", name)));
            }
            if app.client_secret.expose_secret().is_empty() {
                return Err(ConfigError::MissingEnvVar(format!("{}_CLIENT_SECRET", name)));
            }
            if !app.redirect_uri.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    key: format!("{}_REDIRECT_URI", name),
                    message: "must be an https URL".to_string(),
                });
            }
        }
        if self.kms.token.expose_secret().is_empty() {
            return Err(ConfigError::MissingEnvVar("PORTCULLIS_VAULT_TOKEN".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProviderConfig::default();
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.max_retries, 3);
        assert!(config.hibp.enabled);
        assert_eq!(
            config.google.redirect_uri,
            "http://localhost:3000/google-oauth-callback"
        );
    }

    #[test]
    fn test_provider_spec_scopes() {
        let config = ProviderConfig::default();
        let github = config.provider_spec(OAuthProvider::Github);
        assert_eq!(github.kind, IdentityProviderKind::Github);
        assert!(github.scopes.iter().any(|s| s == "user:email"));
        assert!(github.endpoints.emails_url.is_some());
    }

    #[test]
    fn test_kms_url() {
        let config = ProviderConfig::default();
        assert_eq!(
            config.kms.url("/v1/transit/decrypt/key"),
            "http://localhost:8200/v1/transit/decrypt/key"
        );
    }

    #[test]
    fn test_rooted_endpoints() {
        let endpoints = ProviderEndpoints::rooted_at("http://127.0.0.1:9000/");
        assert_eq!(endpoints.token_url, "http://127.0.0.1:9000/token");
    }

    #[test]
    fn test_validate_for_production() {
        let mut config = ProviderConfig::default();
        assert!(config.validate_for_production().is_err());

        for app in [&mut config.google, &mut config.microsoft, &mut config.github] {
            app.client_id = "id".to_string();
            app.client_secret = SecretString::new("secret".to_string());
            app.redirect_uri = "https://auth.example.com/callback".to_string();
        }
        config.kms.token = SecretString::new("vault-token".to_string());
        assert!(config.validate_for_production().is_ok());
    }
}
