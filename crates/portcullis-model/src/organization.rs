//! Organization domain models
//!
//! Organizations are sub-tenants of a project. Users belong to exactly one
//! organization, and each organization narrows the project's login methods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::login::LoginMethods;

/// An organization within a project.
///
/// # Examples
///
/// ```
/// use portcullis_model::{LoginMethod, Organization};
/// use uuid::Uuid;
///
/// let org = Organization::new(Uuid::now_v7(), "Acme Engineering");
/// assert!(!org.login_methods.allows(LoginMethod::Password));
/// assert!(!org.require_mfa);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Unique identifier for the organization
    pub id: Uuid,

    /// Owning project
    pub project_id: Uuid,

    /// Human-readable name
    pub display_name: String,

    /// Organization-level kill switch
    #[serde(default)]
    pub logins_disabled: bool,

    /// Login methods enabled for this organization
    #[serde(default)]
    pub login_methods: LoginMethods,

    /// Require a passkey or authenticator app before exchange
    #[serde(default)]
    pub require_mfa: bool,

    /// Email domains owned by the organization
    #[serde(default)]
    pub domains: Vec<String>,

    /// When the organization was created
    pub create_time: DateTime<Utc>,

    /// When the organization was last updated
    pub update_time: DateTime<Utc>,
}

impl Organization {
    /// Creates an organization with every login method disabled.
    pub fn new(project_id: Uuid, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            project_id,
            display_name: display_name.into(),
            logins_disabled: false,
            login_methods: LoginMethods::default(),
            require_mfa: false,
            domains: Vec::new(),
            create_time: now,
            update_time: now,
        }
    }

    /// Set the enabled login methods.
    pub fn with_login_methods(mut self, login_methods: LoginMethods) -> Self {
        self.login_methods = login_methods;
        self
    }

    /// Require a second factor before exchange.
    pub fn with_require_mfa(mut self, require_mfa: bool) -> Self {
        self.require_mfa = require_mfa;
        self
    }

    /// Whether `require_mfa` is enforceable, i.e. some second factor is enabled.
    pub fn mfa_enforceable(&self) -> bool {
        self.require_mfa && self.login_methods.has_second_factor()
    }
}
