//! The `JobStore` trait: the one seam between the kernel and a concrete
//! transactional store. `fenceq-postgres` is the production implementation;
//! `fenceq-testing` ships an in-memory double with the same semantics for
//! fast unit tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ApplyError, FenceError, StoreError, SubmitError};
use crate::model::{
    ClaimedJob, FailureKind, FailureOutcome, FencingToken, JobId, JobRecord, LedgerEffect, SubmitRequest,
};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// §4.1 Submitter. Idempotent on `idempotency_key`.
    async fn submit(&self, request: SubmitRequest) -> Result<JobId, SubmitError>;

    /// §4.2 Claimer. Installs a new lease generation on the oldest eligible
    /// job, or returns `None` if the queue currently has nothing claimable.
    async fn claim(&self, worker_id: &str, lease_duration: Duration) -> Result<Option<ClaimedJob>, StoreError>;

    /// §4.4 Fence-check. Must read `fencing_token` and `lease_expires_at`
    /// from the store's own clock, never the caller's.
    async fn assert_fence(&self, job_id: JobId, token: FencingToken) -> Result<(), FenceError>;

    /// §4.5 Applier. Binds `effect` to `(job_id, token)`, idempotently, and
    /// converges the job to `succeeded` only if that ledger row exists.
    async fn mark_succeeded(
        &self,
        job_id: JobId,
        token: FencingToken,
        effect: LedgerEffect,
    ) -> Result<(), ApplyError>;

    /// §4.6 Retry scheduler. No-ops (returns `FailureOutcome::Skipped`) if
    /// the job is no longer `running` under `token` (a concurrent reclaim
    /// already happened).
    async fn mark_failed(
        &self,
        job_id: JobId,
        token: FencingToken,
        kind: FailureKind,
        error: &str,
    ) -> Result<FailureOutcome, StoreError>;

    /// §4.7 Reconciler. Converges up to `batch_size` jobs whose ledger entry
    /// committed but whose state never reached `succeeded`. Returns the
    /// repaired ids.
    async fn reconcile(&self, batch_size: i64) -> Result<Vec<JobId>, StoreError>;

    /// Read-only snapshot for `GET /jobs/{id}` and tests.
    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;
}
