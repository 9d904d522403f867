//! Prefixed textual identifiers
//!
//! Identifiers cross the API boundary as `<prefix><32 hex digits>`, e.g.
//! `org_0190f2a4c3d87c1e9f4b2a6d5e8c7b10`. The prefix makes ids of different
//! kinds impossible to confuse.

use thiserror::Error;
use uuid::Uuid;

/// Failure to parse a prefixed identifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("expected id with prefix {expected:?}")]
    WrongPrefix { expected: &'static str },

    #[error("malformed {kind} id")]
    Malformed { kind: &'static str },
}

/// Kinds of identifier with a textual prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdFormat {
    Project,
    Organization,
    User,
    IntermediateSession,
    Session,
    SamlConnection,
    OidcConnection,
}

impl IdFormat {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Project => "project_",
            Self::Organization => "org_",
            Self::User => "user_",
            Self::IntermediateSession => "intermediate_session_",
            Self::Session => "session_",
            Self::SamlConnection => "saml_connection_",
            Self::OidcConnection => "oidc_connection_",
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Organization => "organization",
            Self::User => "user",
            Self::IntermediateSession => "intermediate session",
            Self::Session => "session",
            Self::SamlConnection => "saml connection",
            Self::OidcConnection => "oidc connection",
        }
    }

    /// Render `id` with this format's prefix.
    ///
    /// # Examples
    ///
    /// ```
    /// use portcullis_model::IdFormat;
    /// use uuid::Uuid;
    ///
    /// let id = Uuid::now_v7();
    /// let text = IdFormat::Organization.format(id);
    /// assert!(text.starts_with("org_"));
    /// assert_eq!(IdFormat::Organization.parse(&text), Ok(id));
    /// ```
    pub fn format(&self, id: Uuid) -> String {
        format!("{}{}", self.prefix(), id.simple())
    }

    /// Parse a prefixed id of this format.
    pub fn parse(&self, text: &str) -> Result<Uuid, IdParseError> {
        let body = text.strip_prefix(self.prefix()).ok_or(IdParseError::WrongPrefix {
            expected: self.prefix(),
        })?;
        if body.len() != 32 {
            return Err(IdParseError::Malformed { kind: self.kind() });
        }
        Uuid::try_parse(body).map_err(|_| IdParseError::Malformed { kind: self.kind() })
    }
}
