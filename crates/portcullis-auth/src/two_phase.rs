//! Two-phase transactions around external I/O.
//!
//! No transaction may stay open across a network call to an identity
//! provider, the key-management service, the breach database or a mail
//! server. Flows that need both are written as a [`TwoPhase`] step and run
//! by [`run_two_phase`]:
//!
//! ```text
//! read(tx₁) ──drop tx₁──→ fetch (no tx, bounded by deadline) ──→ write(tx₂) ──commit──→
//! ```
//!
//! `read` only reads. `fetch` sees the snapshot but no transaction.
//! `write` runs in a fresh transaction and must re-check anything another
//! request could have changed in between, in particular single-use digests.

use async_trait::async_trait;
use portcullis_store::{Store, Transaction};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};

/// One flow split around external I/O.
#[async_trait]
pub trait TwoPhase: Send + Sync {
    /// What `read` captured for `fetch` and `write`.
    type Snapshot: Send + Sync;

    /// Result of the external I/O.
    type Fetched: Send;

    /// Result of the whole flow.
    type Output: Send;

    /// Load and validate state in a read-only transaction.
    async fn read(&self, tx: &mut dyn Transaction) -> ApiResult<Self::Snapshot>;

    /// Perform external I/O with no transaction open.
    async fn fetch(&self, snapshot: &Self::Snapshot) -> ApiResult<Self::Fetched>;

    /// Persist the outcome in a fresh transaction.
    async fn write(
        &self,
        tx: &mut dyn Transaction,
        snapshot: Self::Snapshot,
        fetched: Self::Fetched,
    ) -> ApiResult<Self::Output>;
}

/// Run `step`, committing the write transaction only if every phase
/// succeeds.
///
/// When `deadline` passes during `fetch` the flow fails with
/// [`ApiError::DeadlineExceeded`] and nothing is written.
pub async fn run_two_phase<S>(
    store: &dyn Store,
    deadline: Option<Instant>,
    step: &S,
) -> ApiResult<S::Output>
where
    S: TwoPhase + ?Sized,
{
    let snapshot = {
        let mut tx = store.begin().await?;
        step.read(tx.as_mut()).await?
    };

    let fetched = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, step.fetch(&snapshot))
            .await
            .map_err(|_| {
                warn!("External I/O exceeded the request deadline");
                ApiError::DeadlineExceeded
            })??,
        None => step.fetch(&snapshot).await?,
    };

    let mut tx = store.begin().await?;
    let output = step.write(tx.as_mut(), snapshot, fetched).await?;
    tx.commit().await?;

    debug!("Two-phase step committed");
    Ok(output)
}
