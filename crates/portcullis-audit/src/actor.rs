//! Audit actors

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The principal that caused an audited mutation.
///
/// This is a closed set: every audit event carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Actor {
    /// A staff member using the console
    ConsoleUser { user_id: Uuid, session_id: Uuid },
    /// A tenant backend calling with an API key
    BackendApiKey { api_key_id: Uuid },
    /// An end user mid-login
    IntermediateSession { intermediate_session_id: Uuid },
    /// A SCIM provisioning client
    ScimApiKey { scim_api_key_id: Uuid },
    /// A logged-in end user
    Session { user_id: Uuid, session_id: Uuid },
}

impl Actor {
    /// Stable discriminator, used as the stored actor kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConsoleUser { .. } => "console_user",
            Self::BackendApiKey { .. } => "backend_api_key",
            Self::IntermediateSession { .. } => "intermediate_session",
            Self::ScimApiKey { .. } => "scim_api_key",
            Self::Session { .. } => "session",
        }
    }
}
