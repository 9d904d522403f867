//! # Portcullis Model
//!
//! Tenant and identity records shared by every portcullis crate.
//!
//! ## Overview
//!
//! - **Projects**: the tenant root, carrying login-method toggles, OAuth
//!   client configuration and the daily email quota
//! - **Organizations**: sub-tenants with their own toggles and MFA policy
//! - **Users**: organization-scoped accounts with credentials and linked
//!   provider subjects
//! - **Verified emails**: project-scoped facts that a provider confirmed an
//!   address
//! - **Intermediate sessions**: pre-authentication state accumulated across
//!   requests until it is exchanged for a session
//! - **Sessions**: long-lived, refresh-token backed user sessions
//! - **Ids**: prefixed textual identifiers used at the API boundary
//!
//! ## Architecture
//!
//! ```text
//! Project
//!   ├─ VerifiedEmail
//!   ├─ IntermediateSession ──(exchange)──→ Session
//!   └─ Organization
//!        ├─ SamlConnection / OidcConnection
//!        └─ User ─→ Session
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use portcullis_model::{LoginMethod, Organization, Project};
//!
//! let mut project = Project::new("Acme");
//! project.login_methods.enable(LoginMethod::Password);
//!
//! let mut org = Organization::new(project.id, "Acme Engineering");
//! org.login_methods.enable(LoginMethod::Password);
//!
//! assert!(project.login_methods.allows(LoginMethod::Password));
//! assert!(org.login_methods.allows(LoginMethod::Password));
//! ```

pub mod connection;
pub mod ids;
pub mod intermediate;
pub mod login;
pub mod organization;
pub mod project;
pub mod session;
pub mod user;

pub use connection::{OidcConnection, SamlConnection};
pub use ids::{IdFormat, IdParseError};
pub use intermediate::{
    IntermediateSession, OAuthProvider, OAuthTarget, PrimaryAuthFactor, UnknownVariant,
};
pub use login::{LoginMethod, LoginMethods};
pub use organization::Organization;
pub use project::{OAuthClientCredentials, Project};
pub use session::Session;
pub use user::{User, VerifiedEmail};
