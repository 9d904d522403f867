//! Audit log event envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, OnceLock, PoisonError};
use uuid::{ContextV7, Timestamp, Uuid};

use crate::actor::Actor;

/// Kind of resource an audit event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    IntermediateSession,
    User,
    Session,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntermediateSession => "intermediate_session",
            Self::User => "user",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn event_id_context() -> &'static Mutex<ContextV7> {
    static CONTEXT: OnceLock<Mutex<ContextV7>> = OnceLock::new();
    CONTEXT.get_or_init(|| Mutex::new(ContextV7::new()))
}

/// Next event id and the event time it encodes.
///
/// Ids come from one process-wide v7 context, so they are strictly
/// increasing even within a millisecond. The returned time is read back
/// from the id, so sorting by id and by time agree.
pub fn next_event_id() -> (Uuid, DateTime<Utc>) {
    let now = Utc::now();
    let id = {
        let context = event_id_context()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Uuid::new_v7(Timestamp::from_unix(
            &*context,
            now.timestamp().max(0) as u64,
            now.timestamp_subsec_nanos(),
        ))
    };
    let event_time = id
        .get_timestamp()
        .and_then(|ts| {
            let (secs, nanos) = ts.to_unix();
            DateTime::from_timestamp(secs as i64, nanos)
        })
        .unwrap_or(now);
    (id, event_time)
}

/// An append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEvent {
    /// UUIDv7 encoding `event_time`
    pub id: Uuid,

    /// Project the event belongs to
    pub project_id: Uuid,

    /// Organization context, when known
    pub organization_id: Option<Uuid>,

    /// Who caused the mutation
    pub actor: Actor,

    /// Kind of the resource the event is about
    pub resource_type: Option<ResourceType>,

    /// Id of the resource the event is about
    pub resource_id: Option<Uuid>,

    /// Event name, e.g. `intermediate_sessions.password_verified`
    pub event_name: String,

    /// When the event happened
    pub event_time: DateTime<Utc>,

    /// Event-specific details
    pub event_details: serde_json::Value,
}

impl AuditLogEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        project_id: Uuid,
        actor: Actor,
        event_name: impl Into<String>,
        event_details: serde_json::Value,
    ) -> Self {
        let (id, event_time) = next_event_id();
        Self {
            id,
            project_id,
            organization_id: None,
            actor,
            resource_type: None,
            resource_id: None,
            event_name: event_name.into(),
            event_time,
            event_details,
        }
    }

    /// Set organization context.
    pub fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Set organization context if known.
    pub fn with_optional_organization(mut self, organization_id: Option<Uuid>) -> Self {
        self.organization_id = organization_id;
        self
    }

    /// Set the resource the event is about.
    pub fn with_resource(mut self, resource_type: ResourceType, resource_id: Uuid) -> Self {
        self.resource_type = Some(resource_type);
        self.resource_id = Some(resource_id);
        self
    }
}
