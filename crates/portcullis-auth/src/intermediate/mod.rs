//! Intermediate session state machine
//!
//! [`IntermediateService`] implements every login step an end user performs
//! before holding a session. Each mutating operation follows the same shape:
//!
//! 1. reload the intermediate session, its project and its organization
//! 2. reject when project or organization logins are disabled
//! 3. reject when the login method is not enabled at project scope and,
//!    once bound, at organization scope
//! 4. delegate to the credential matcher, identity linker or a provider
//! 5. persist the new flags, fixing the primary auth factor if unset
//! 6. record exactly one audit event in the same transaction
//!
//! Steps that call out to an identity provider, the key-management service,
//! the breach database or a SAML validator run as a
//! [`TwoPhase`](crate::two_phase::TwoPhase) step so that no transaction is
//! held across the call. Emails are sent after the transaction commits.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let service = IntermediateService::new(collaborators, ProviderConfig::from_env(), AuthConfig::from_env());
//! let ctx = IntermediateContext::new(project_id, intermediate_session_id);
//!
//! service.verify_password(&ctx, None, &password).await?;
//! let exchanged = service.exchange_intermediate_session_for_session(&ctx).await?;
//! ```

mod email;
mod exchange;
mod oauth;
mod password;
mod policy;
mod reset;
mod saml;

use portcullis_audit::Actor;
use portcullis_providers::{
    BreachedPasswordChecker, EmailSender, KeyManagement, OAuthClient, ProviderConfig,
};
use portcullis_store::Store;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::password::CredentialMatcher;
use crate::saml::SamlAssertionValidator;
use crate::session::AccessTokenIssuer;

pub use exchange::ExchangedSession;

/// External collaborators of the service.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub oauth: Arc<dyn OAuthClient>,
    pub kms: Arc<dyn KeyManagement>,
    pub breach_checker: Arc<dyn BreachedPasswordChecker>,
    pub email_sender: Arc<dyn EmailSender>,
    pub saml_validator: Arc<dyn SamlAssertionValidator>,
    pub access_tokens: Arc<dyn AccessTokenIssuer>,
}

/// The request an operation is performed for.
#[derive(Debug, Clone, Copy)]
pub struct IntermediateContext {
    /// Project the caller authenticated against
    pub project_id: Uuid,

    /// Intermediate session the caller presented
    pub intermediate_session_id: Uuid,

    /// Deadline for external I/O
    pub deadline: Option<Instant>,
}

impl IntermediateContext {
    pub fn new(project_id: Uuid, intermediate_session_id: Uuid) -> Self {
        Self {
            project_id,
            intermediate_session_id,
            deadline: None,
        }
    }

    /// Bound external I/O by `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Audit actor for every mutation made on behalf of this request.
    pub fn actor(&self) -> Actor {
        Actor::IntermediateSession {
            intermediate_session_id: self.intermediate_session_id,
        }
    }
}

/// Login steps on intermediate sessions.
///
/// Holds no mutable state; share it across requests behind an `Arc`.
pub struct IntermediateService {
    store: Arc<dyn Store>,
    oauth: Arc<dyn OAuthClient>,
    kms: Arc<dyn KeyManagement>,
    breach_checker: Arc<dyn BreachedPasswordChecker>,
    email_sender: Arc<dyn EmailSender>,
    saml_validator: Arc<dyn SamlAssertionValidator>,
    access_tokens: Arc<dyn AccessTokenIssuer>,
    providers: ProviderConfig,
    config: AuthConfig,
    matcher: CredentialMatcher,
}

impl std::fmt::Debug for IntermediateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntermediateService")
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

impl IntermediateService {
    pub fn new(collaborators: Collaborators, providers: ProviderConfig, config: AuthConfig) -> Self {
        let matcher = CredentialMatcher::from_config(&config);
        Self {
            store: collaborators.store,
            oauth: collaborators.oauth,
            kms: collaborators.kms,
            breach_checker: collaborators.breach_checker,
            email_sender: collaborators.email_sender,
            saml_validator: collaborators.saml_validator,
            access_tokens: collaborators.access_tokens,
            providers,
            config,
            matcher,
        }
    }

    /// Replace the credential matcher, e.g. to lower the bcrypt cost.
    pub fn with_matcher(mut self, matcher: CredentialMatcher) -> Self {
        self.matcher = matcher;
        self
    }
}
