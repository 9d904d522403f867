//! SAML assertion validation seam.
//!
//! XML signature checking is delegated to a [`SamlAssertionValidator`]; the
//! core only consumes the subject email of an accepted assertion.

use async_trait::async_trait;
use portcullis_model::SamlConnection;
use thiserror::Error;

/// A validated assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlAssertion {
    /// Subject email asserted by the identity provider
    pub email: String,
}

/// Why an assertion was refused.
#[derive(Debug, Error)]
#[error("saml assertion rejected: {0}")]
pub struct SamlRejected(pub String);

/// Validates a base64 `SAMLResponse` against a connection's IdP settings.
#[async_trait]
pub trait SamlAssertionValidator: Send + Sync {
    async fn validate(
        &self,
        connection: &SamlConnection,
        saml_response: &str,
    ) -> Result<SamlAssertion, SamlRejected>;
}
