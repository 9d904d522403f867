//! Enterprise identity provider connections
//!
//! Connection CRUD lives elsewhere; login flows only read these records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A SAML identity provider configured for an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamlConnection {
    /// Unique identifier
    pub id: Uuid,

    /// Owning organization
    pub organization_id: Uuid,

    /// Whether this is the organization's default SAML connection
    #[serde(default)]
    pub primary: bool,

    /// IdP single sign-on URL
    pub idp_redirect_url: Option<String>,

    /// IdP entity id
    pub idp_entity_id: Option<String>,

    /// PEM certificate used to verify assertions
    pub idp_x509_certificate: Option<String>,

    /// When the connection was created
    pub create_time: DateTime<Utc>,
}

impl SamlConnection {
    pub fn new(organization_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            organization_id,
            primary: false,
            idp_redirect_url: None,
            idp_entity_id: None,
            idp_x509_certificate: None,
            create_time: Utc::now(),
        }
    }
}

/// An OpenID Connect identity provider configured for an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConnection {
    /// Unique identifier
    pub id: Uuid,

    /// Owning organization
    pub organization_id: Uuid,

    /// Whether this is the organization's default OIDC connection
    #[serde(default)]
    pub primary: bool,

    /// Discovery document URL (`.well-known/openid-configuration`)
    pub configuration_url: String,

    /// OAuth client id
    pub client_id: String,

    /// Client secret encrypted by the key-management service
    pub client_secret_ciphertext: Vec<u8>,

    /// When the connection was created
    pub create_time: DateTime<Utc>,
}

impl OidcConnection {
    pub fn new(
        organization_id: Uuid,
        configuration_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret_ciphertext: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            organization_id,
            primary: false,
            configuration_url: configuration_url.into(),
            client_id: client_id.into(),
            client_secret_ciphertext: client_secret_ciphertext.into(),
            create_time: Utc::now(),
        }
    }
}
