//! # Portcullis Providers
//!
//! External collaborators of the portcullis authentication core.
//!
//! ## Overview
//!
//! - **OAuth**: authorize URLs, code redemption and userinfo for Google,
//!   Microsoft, GitHub and any OpenID Connect provider (via discovery)
//! - **Key management**: decrypting tenant OAuth client secrets through a
//!   Vault transit engine
//! - **Breached passwords**: k-anonymity lookups against a Have I Been Pwned
//!   compatible range API
//! - **Email**: transactional email over SMTP, or to the log in development
//! - **Retry**: exponential backoff for transient HTTP failures
//!
//! Every collaborator is a trait so the core can be exercised with fakes;
//! the HTTP implementations here are the production defaults.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use portcullis_model::OAuthProvider;
//! use portcullis_providers::{HttpOAuthClient, OAuthClient, ProviderConfig};
//!
//! let config = ProviderConfig::from_env();
//! let client = HttpOAuthClient::new(config.timeout()).unwrap();
//!
//! let spec = config.provider_spec(OAuthProvider::Google);
//! let url = client
//!     .authorize_url(&spec, "client-id", "https://auth.example.com/callback", "opaque-state")
//!     .unwrap();
//! assert!(url.contains("state=opaque-state"));
//! ```

pub mod config;
pub mod email;
pub mod error;
pub mod hibp;
pub mod kms;
pub mod oauth;
pub mod retry;

pub use config::{
    ConfigError, HibpConfig, KmsConfig, OAuthAppConfig, ProviderConfig, ProviderEndpoints,
};
pub use email::{ConsoleEmailSender, EmailMessage, EmailSender};
pub use error::{ProviderError, ProviderResult};
pub use hibp::{BreachedPasswordChecker, HibpClient};
pub use kms::{KeyManagement, VaultTransitKms};
pub use oauth::{
    HttpOAuthClient, IdentityProviderKind, OAuthApp, OAuthClient, ProviderSpec, RedeemedIdentity,
};
pub use retry::{with_retry, with_retry_if, RetryConfig};

#[cfg(feature = "smtp")]
pub use email::{SmtpConfig, SmtpEmailSender};
