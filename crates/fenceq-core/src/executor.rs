//! §4.3 Executor — runs a user handler for a claimed job under fencing
//! guards, then hands the result to the Applier or Retry scheduler.
//!
//! Grounded in the teacher's `Effect<Command, Deps>` shape, generalized from
//! "command → event" to "claimed job → ledger effect".

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{ApplyError, FenceError, StoreError};
use crate::model::{ClaimedJob, FailureKind, FailureOutcome, LedgerEffect};
use crate::store::JobStore;

/// One user-provided job handler. `Deps` carries whatever the handler needs
/// (an HTTP client, another store, ...) the way the teacher threads
/// `EffectContext<Deps>` through effects.
#[async_trait]
pub trait JobHandler<Deps>: Send + Sync {
    async fn handle(&self, job: &ClaimedJob, deps: &Deps) -> Result<LedgerEffect, HandlerError>;
}

#[derive(Debug, Clone)]
pub struct HandlerError {
    pub message: String,
    pub kind: FailureKind,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Retryable,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::NonRetryable,
        }
    }
}

/// What happened to one execution attempt. Fence rejections and
/// retry-scheduler no-ops are first-class outcomes, not errors — per §7 the
/// worker must never charge an attempt or log a failure for them.
#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Requeued { delay_seconds: i64 },
    DeadLettered,
    Skipped,
    Aborted(FenceError),
}

pub struct Executor<S> {
    store: Arc<S>,
}

impl<S: JobStore> Executor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Runs the full fence-check → handle → re-fence → apply/retry protocol
    /// for one claimed job. Only store errors surface as `Err`; everything
    /// else — including a stale fence, a failed handler, or a skipped retry
    /// update — is a variant of `Outcome`.
    pub async fn execute<H, D>(&self, job: ClaimedJob, handler: &H, deps: &D) -> Result<Outcome, StoreError>
    where
        H: JobHandler<D>,
    {
        if let Some(aborted) = self.fence_check(&job).await? {
            return Ok(aborted);
        }

        info!(job_id = %job.id, token = %job.token, job_type = %job.job_type, "execution_started");
        let result = handler.handle(&job, deps).await;

        // Anything the handler did could have taken longer than the lease.
        if let Some(aborted) = self.fence_check(&job).await? {
            return Ok(aborted);
        }

        match result {
            Ok(effect) => self.apply(&job, effect).await,
            Err(handler_err) => self.retry(&job, handler_err).await,
        }
    }

    async fn fence_check(&self, job: &ClaimedJob) -> Result<Option<Outcome>, StoreError> {
        match self.store.assert_fence(job.id, job.token).await {
            Ok(()) => Ok(None),
            Err(fence_err) => {
                warn!(
                    job_id = %job.id,
                    token = %job.token,
                    reason = fence_err.reason(),
                    "stale_write_blocked"
                );
                Ok(Some(Outcome::Aborted(fence_err)))
            }
        }
    }

    async fn apply(&self, job: &ClaimedJob, effect: LedgerEffect) -> Result<Outcome, StoreError> {
        match self.store.mark_succeeded(job.id, job.token, effect).await {
            Ok(()) => Ok(Outcome::Succeeded),
            Err(ApplyError::StaleToken) => {
                warn!(job_id = %job.id, token = %job.token, reason = "token_mismatch", "stale_write_blocked");
                Ok(Outcome::Aborted(FenceError::StaleToken))
            }
            Err(ApplyError::Store(e)) => Err(e),
        }
    }

    async fn retry(&self, job: &ClaimedJob, handler_err: HandlerError) -> Result<Outcome, StoreError> {
        let outcome = self
            .store
            .mark_failed(job.id, job.token, handler_err.kind, &handler_err.message)
            .await?;

        match outcome {
            FailureOutcome::Requeued { delay_seconds } => Ok(Outcome::Requeued { delay_seconds }),
            FailureOutcome::DeadLettered => Ok(Outcome::DeadLettered),
            FailureOutcome::Skipped => Ok(Outcome::Skipped),
        }
    }
}

/// Convenience for binaries that want a single "tick" helper: claim one job
/// and run it to an `Outcome`, or report that the queue was empty.
pub async fn claim_and_execute<S, H, D>(
    store: &Arc<S>,
    worker_id: &str,
    lease_duration: std::time::Duration,
    handler: &H,
    deps: &D,
) -> Result<Option<Outcome>, StoreError>
where
    S: JobStore,
    H: JobHandler<D>,
{
    let Some(claimed) = store.claim(worker_id, lease_duration).await? else {
        return Ok(None);
    };

    info!(job_id = %claimed.id, token = %claimed.token, worker_id = %worker_id, "lease_acquired");

    let executor = Executor::new(Arc::clone(store));
    let outcome = executor.execute(claimed, handler, deps).await?;
    Ok(Some(outcome))
}
