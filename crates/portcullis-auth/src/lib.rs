//! # Portcullis Authentication
//!
//! Progressive authentication for a multi-tenant identity platform.
//!
//! ## Overview
//!
//! An end user logs in by accumulating verified signals on an
//! *intermediate session*, then exchanging it once for a *session*:
//! - **Intermediate sessions**: the state machine in [`IntermediateService`]
//! - **Credential matching**: bcrypt verification with attempt counting and
//!   lockout ([`CredentialMatcher`])
//! - **Identity linking**: finding the user an intermediate session belongs to
//! - **OAuth**: Google, Microsoft, GitHub and per-organization OIDC, with
//!   tenant client secrets decrypted through key management
//! - **SAML**: assertion redemption behind a pluggable validator
//! - **Sessions**: refresh tokens stored as digests only, with JWT access
//!   tokens signed on demand
//! - **Audit**: every mutation writes one audit event in its own transaction
//!
//! ## Features
//!
//! - `jwt` (default): [`JwtAccessTokenIssuer`] using jsonwebtoken
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portcullis_auth::{AuthConfig, Collaborators, IntermediateContext, IntermediateService};
//! use portcullis_providers::ProviderConfig;
//!
//! let service = IntermediateService::new(collaborators, ProviderConfig::from_env(), AuthConfig::from_env());
//! let ctx = IntermediateContext::new(project_id, intermediate_session_id);
//!
//! service.issue_email_verification_challenge(&ctx, "user@example.com").await?;
//! service.verify_email_challenge(&ctx, &code).await?;
//! let exchanged = service.exchange_intermediate_session_for_session(&ctx).await?;
//! ```
//!
//! ## Transactions
//!
//! Operations that call an identity provider run as a [`TwoPhase`] step:
//! a read transaction, the external call with no transaction open, then a
//! write transaction that re-checks every precondition. Everything else
//! runs in a single transaction.

pub mod audit;
pub mod claims;
pub mod config;
pub mod error;
pub mod intermediate;
#[cfg(feature = "jwt")]
pub mod jwt;
pub mod linker;
pub mod password;
pub mod saml;
pub mod session;
pub mod tokens;
pub mod two_phase;

// Re-export main types
pub use claims::AccessTokenClaims;
pub use config::AuthConfig;
pub use error::{ApiError, ApiResult, ErrorKind};
pub use intermediate::{Collaborators, ExchangedSession, IntermediateContext, IntermediateService};
pub use password::{CredentialMatcher, MatchOutcome};
pub use saml::{SamlAssertion, SamlAssertionValidator, SamlRejected};
pub use session::{AccessTokenIssuer, IssuedSession};
pub use tokens::{SecretToken, SecretTokenKind};
pub use two_phase::{run_two_phase, TwoPhase};

#[cfg(feature = "jwt")]
pub use jwt::{JwtAccessTokenIssuer, JwtAlgorithm, JwtConfig};
