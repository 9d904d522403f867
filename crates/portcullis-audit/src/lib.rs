//! # Portcullis Audit
//!
//! Audit log events for the portcullis authentication core.
//!
//! ## Overview
//!
//! - **Actors**: the closed set of principals that can cause a mutation
//! - **Events**: the append-only record, keyed by a strictly increasing
//!   UUIDv7 that encodes the event time
//! - **Typed events**: strongly-typed detail payloads per resource, each
//!   converting into a generic [`AuditLogEvent`]
//!
//! Events are written by the store inside the same transaction as the
//! mutation they describe; a failed write fails the mutation.
//!
//! ## Usage
//!
//! ```rust
//! use portcullis_audit::{Actor, IntermediateSessionEvent};
//! use uuid::Uuid;
//!
//! let project_id = Uuid::now_v7();
//! let intermediate_session_id = Uuid::now_v7();
//!
//! let event = IntermediateSessionEvent::PasswordVerified {
//!     intermediate_session_id,
//!     organization_id: Uuid::now_v7(),
//! }
//! .to_event(project_id, Actor::IntermediateSession { intermediate_session_id });
//!
//! assert_eq!(event.event_name, "intermediate_sessions.password_verified");
//! ```

pub mod actor;
pub mod event;
pub mod events;

pub use actor::Actor;
pub use event::{next_event_id, AuditLogEvent, ResourceType};
pub use events::{IntermediateSessionEvent, SessionEvent, UserEvent};
