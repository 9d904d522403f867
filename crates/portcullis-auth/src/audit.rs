//! Audit recording.
//!
//! Every state mutation appends exactly one audit event through the same
//! transaction as the mutation. A failed audit write fails the operation.

use portcullis_audit::AuditLogEvent;
use portcullis_store::Transaction;
use tracing::{debug, error};

use crate::error::{ApiError, ApiResult};

/// Append `event` inside `tx`.
pub async fn record(tx: &mut dyn Transaction, event: AuditLogEvent) -> ApiResult<AuditLogEvent> {
    if let Err(e) = tx.create_audit_log_event(&event).await {
        error!(event_name = %event.event_name, error = %e, "Failed to write audit log event");
        return Err(ApiError::internal("write audit log event", e));
    }

    debug!(
        event_id = %event.id,
        event_name = %event.event_name,
        actor = event.actor.kind(),
        "Audit log event recorded"
    );
    Ok(event)
}
