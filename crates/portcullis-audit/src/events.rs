//! Typed audit events
//!
//! Each enum groups the events about one resource type. `to_event` picks the
//! event name, serializes the variant as the detail payload and sets the
//! resource and organization context.

use chrono::{DateTime, Utc};
use portcullis_model::{OAuthTarget, PrimaryAuthFactor};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor::Actor;
use crate::event::{AuditLogEvent, ResourceType};

fn details<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

// ============================================================================
// Intermediate sessions
// ============================================================================

/// Login progress recorded against an intermediate session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntermediateSessionEvent {
    /// A password was staged for the user
    PasswordRegistered {
        intermediate_session_id: Uuid,
        organization_id: Uuid,
    },
    /// A password was matched in the challenge flow
    PasswordVerified {
        intermediate_session_id: Uuid,
        organization_id: Uuid,
    },
    /// A password was matched by email across the project
    PasswordLogin {
        intermediate_session_id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    },
    /// A password reset code was issued
    PasswordResetCodeIssued {
        intermediate_session_id: Uuid,
        email_quota_usage: i64,
    },
    /// A password reset code was redeemed
    PasswordResetCodeVerified { intermediate_session_id: Uuid },
    /// An email verification code was issued
    EmailVerificationChallengeIssued {
        intermediate_session_id: Uuid,
        email: String,
        email_quota_usage: i64,
    },
    /// An email verification code was redeemed
    EmailVerified {
        intermediate_session_id: Uuid,
        email: String,
    },
    /// An OAuth authorization URL was issued
    #[serde(rename = "oauth_redirect_issued")]
    OAuthRedirectIssued {
        intermediate_session_id: Uuid,
        target: OAuthTarget,
    },
    /// An OAuth authorization code was redeemed
    #[serde(rename = "oauth_code_redeemed")]
    OAuthCodeRedeemed {
        intermediate_session_id: Uuid,
        target: OAuthTarget,
        email: String,
        email_verified: bool,
    },
    /// A SAML assertion was accepted
    SamlAssertionRedeemed {
        intermediate_session_id: Uuid,
        saml_connection_id: Uuid,
        email: String,
    },
}

impl IntermediateSessionEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::PasswordRegistered { .. } => "intermediate_sessions.password_registered",
            Self::PasswordVerified { .. } => "intermediate_sessions.password_verified",
            Self::PasswordLogin { .. } => "intermediate_sessions.password_login",
            Self::PasswordResetCodeIssued { .. } => {
                "intermediate_sessions.password_reset_code_issued"
            }
            Self::PasswordResetCodeVerified { .. } => {
                "intermediate_sessions.password_reset_code_verified"
            }
            Self::EmailVerificationChallengeIssued { .. } => {
                "intermediate_sessions.email_verification_challenge_issued"
            }
            Self::EmailVerified { .. } => "intermediate_sessions.email_verified",
            Self::OAuthRedirectIssued { .. } => "intermediate_sessions.oauth_redirect_issued",
            Self::OAuthCodeRedeemed { .. } => "intermediate_sessions.oauth_code_redeemed",
            Self::SamlAssertionRedeemed { .. } => "intermediate_sessions.saml_assertion_redeemed",
        }
    }

    fn intermediate_session_id(&self) -> Uuid {
        match self {
            Self::PasswordRegistered { intermediate_session_id, .. }
            | Self::PasswordVerified { intermediate_session_id, .. }
            | Self::PasswordLogin { intermediate_session_id, .. }
            | Self::PasswordResetCodeIssued { intermediate_session_id, .. }
            | Self::PasswordResetCodeVerified { intermediate_session_id }
            | Self::EmailVerificationChallengeIssued { intermediate_session_id, .. }
            | Self::EmailVerified { intermediate_session_id, .. }
            | Self::OAuthRedirectIssued { intermediate_session_id, .. }
            | Self::OAuthCodeRedeemed { intermediate_session_id, .. }
            | Self::SamlAssertionRedeemed { intermediate_session_id, .. } => *intermediate_session_id,
        }
    }

    fn organization_id(&self) -> Option<Uuid> {
        match self {
            Self::PasswordRegistered { organization_id, .. }
            | Self::PasswordVerified { organization_id, .. }
            | Self::PasswordLogin { organization_id, .. } => Some(*organization_id),
            _ => None,
        }
    }

    /// Convert to a generic audit event.
    pub fn to_event(&self, project_id: Uuid, actor: Actor) -> AuditLogEvent {
        AuditLogEvent::new(project_id, actor, self.event_name(), details(self))
            .with_optional_organization(self.organization_id())
            .with_resource(ResourceType::IntermediateSession, self.intermediate_session_id())
    }
}

// ============================================================================
// Users
// ============================================================================

/// Credential bookkeeping recorded against a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserEvent {
    /// A password attempt did not match
    PasswordAttemptFailed { user_id: Uuid, organization_id: Uuid },
    /// Too many mismatches; password checks are suspended
    PasswordLockedOut {
        user_id: Uuid,
        organization_id: Uuid,
        lockout_expire_time: DateTime<Utc>,
    },
}

impl UserEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::PasswordAttemptFailed { .. } => "users.password_attempt_failed",
            Self::PasswordLockedOut { .. } => "users.password_locked_out",
        }
    }

    pub fn to_event(&self, project_id: Uuid, actor: Actor) -> AuditLogEvent {
        let (user_id, organization_id) = match self {
            Self::PasswordAttemptFailed { user_id, organization_id }
            | Self::PasswordLockedOut { user_id, organization_id, .. } => (*user_id, *organization_id),
        };
        AuditLogEvent::new(project_id, actor, self.event_name(), details(self))
            .with_organization(organization_id)
            .with_resource(ResourceType::User, user_id)
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Session lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// An intermediate session was exchanged for a session
    Created {
        session_id: Uuid,
        user_id: Uuid,
        organization_id: Uuid,
        intermediate_session_id: Uuid,
        primary_auth_factor: PrimaryAuthFactor,
        user_created: bool,
    },
}

impl SessionEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "sessions.create",
        }
    }

    pub fn to_event(&self, project_id: Uuid, actor: Actor) -> AuditLogEvent {
        match self {
            Self::Created { session_id, organization_id, .. } => {
                AuditLogEvent::new(project_id, actor, self.event_name(), details(self))
                    .with_organization(*organization_id)
                    .with_resource(ResourceType::Session, *session_id)
            }
        }
    }
}
