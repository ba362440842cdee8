//! An in-memory `JobStore` double with the same claim/fence/apply/retry/
//! reconcile semantics as the Postgres implementation, so the kernel's
//! concurrency properties (§8) can be exercised without a live database.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use fenceq_core::{
    async_trait, ApplyError, ClaimedJob, Clock, FailureKind, FailureOutcome, FenceError, FencingToken,
    JobId, JobRecord, JobState, JobStore, LedgerEffect, Payload, StoreError, SubmitError, SubmitRequest,
    SystemClock,
};
use tokio::sync::Mutex;
use uuid::Uuid;

struct Row {
    id: Uuid,
    job_type: String,
    payload: Payload,
    idempotency_key: Option<String>,
    payload_hash: Option<String>,
    state: JobState,
    attempts: i32,
    max_attempts: i32,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    fencing_token: i64,
    next_run_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Row>,
    ledger: HashSet<(Uuid, i64)>,
    next_seq: u64,
}

pub struct InMemoryJobStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryJobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn submit(&self, request: SubmitRequest) -> Result<JobId, SubmitError> {
        let mut state = self.state.lock().await;
        let payload_hash = request.payload.hash();

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = state.jobs.values().find(|r| r.idempotency_key.as_deref() == Some(key.as_str())) {
                if existing.payload_hash.as_deref() == Some(payload_hash.as_str()) {
                    return Ok(JobId(existing.id));
                }
                return Err(SubmitError::IdempotencyConflict);
            }
        }

        let now = self.now();
        let id = Uuid::new_v4();
        let seq = state.next_seq;
        state.next_seq += 1;

        state.jobs.insert(
            id,
            Row {
                id,
                job_type: request.job_type,
                payload: request.payload,
                idempotency_key: request.idempotency_key,
                payload_hash: Some(payload_hash),
                state: JobState::Queued,
                attempts: 0,
                max_attempts: request.max_attempts.unwrap_or(3),
                lease_owner: None,
                lease_expires_at: None,
                fencing_token: 0,
                next_run_at: None,
                last_error: None,
                created_at: now,
                updated_at: now,
                seq,
            },
        );

        Ok(JobId(id))
    }

    async fn claim(&self, worker_id: &str, lease_duration: StdDuration) -> Result<Option<ClaimedJob>, StoreError> {
        let mut state = self.state.lock().await;
        let now = self.now();

        let candidate_id = state
            .jobs
            .values()
            .filter(|r| is_claimable(r, now))
            .min_by_key(|r| (r.created_at, r.seq))
            .map(|r| r.id);

        let Some(id) = candidate_id else {
            return Ok(None);
        };

        let lease_duration = Duration::from_std(lease_duration)
            .map_err(|e| StoreError::InvariantViolation(e.to_string()))?;

        let row = state.jobs.get_mut(&id).expect("candidate id exists");
        row.state = JobState::Running;
        row.lease_owner = Some(worker_id.to_string());
        row.lease_expires_at = Some(now + lease_duration);
        row.fencing_token += 1;
        row.updated_at = now;

        Ok(Some(ClaimedJob {
            id: JobId(row.id),
            token: FencingToken(row.fencing_token),
            job_type: row.job_type.clone(),
            payload: row.payload.clone(),
            attempts: row.attempts,
            max_attempts: row.max_attempts,
        }))
    }

    async fn assert_fence(&self, job_id: JobId, token: FencingToken) -> Result<(), FenceError> {
        let state = self.state.lock().await;
        let now = self.now();
        let row = state.jobs.get(&job_id.0).ok_or(FenceError::StaleToken)?;

        if row.fencing_token != token.0 {
            return Err(FenceError::StaleToken);
        }
        if let Some(expires_at) = row.lease_expires_at {
            if expires_at < now {
                return Err(FenceError::LeaseExpired);
            }
        }
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        job_id: JobId,
        token: FencingToken,
        _effect: LedgerEffect,
    ) -> Result<(), ApplyError> {
        let mut state = self.state.lock().await;
        let now = self.now();

        let current_token = state
            .jobs
            .get(&job_id.0)
            .map(|r| r.fencing_token)
            .ok_or(ApplyError::StaleToken)?;
        if current_token != token.0 {
            return Err(ApplyError::StaleToken);
        }

        // Only a newly-inserted ledger row charges an attempt — a replayed
        // apply under the same token must converge idempotently (I2/I3).
        let newly_inserted = state.ledger.insert((job_id.0, token.0));

        let row = state.jobs.get_mut(&job_id.0).expect("row exists");
        row.state = JobState::Succeeded;
        if newly_inserted {
            row.attempts += 1;
        }
        row.lease_owner = None;
        row.lease_expires_at = None;
        row.next_run_at = None;
        row.updated_at = now;

        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: JobId,
        token: FencingToken,
        kind: FailureKind,
        error: &str,
    ) -> Result<FailureOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let now = self.now();

        let row = state
            .jobs
            .get_mut(&job_id.0)
            .ok_or_else(|| StoreError::InvariantViolation("mark_failed on unknown job".into()))?;

        if row.state != JobState::Running || row.fencing_token != token.0 {
            return Ok(FailureOutcome::Skipped);
        }

        let new_attempts = row.attempts + 1;
        row.attempts = new_attempts;
        row.last_error = Some(error.to_string());
        row.lease_owner = None;
        row.lease_expires_at = None;
        row.updated_at = now;

        if kind == FailureKind::NonRetryable || new_attempts >= row.max_attempts {
            row.state = JobState::Failed;
            row.next_run_at = None;
            return Ok(FailureOutcome::DeadLettered);
        }

        let delay_seconds = fenceq_core::retry_delay_seconds(new_attempts);
        row.state = JobState::Queued;
        row.next_run_at = Some(now + Duration::seconds(delay_seconds));

        Ok(FailureOutcome::Requeued { delay_seconds })
    }

    async fn reconcile(&self, batch_size: i64) -> Result<Vec<JobId>, StoreError> {
        let mut state = self.state.lock().await;
        let now = self.now();

        let mut candidates: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|r| r.state != JobState::Succeeded && has_any_ledger_entry(&state.ledger, r.id))
            .map(|r| r.id)
            .collect();

        candidates.sort_by_key(|id| state.jobs[id].updated_at);
        candidates.truncate(batch_size.max(0) as usize);

        for id in &candidates {
            let row = state.jobs.get_mut(id).expect("candidate exists");
            row.state = JobState::Succeeded;
            row.lease_owner = None;
            row.lease_expires_at = None;
            row.next_run_at = None;
            row.updated_at = now;
        }

        Ok(candidates.into_iter().map(JobId).collect())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&job_id.0).map(|r| JobRecord {
            id: JobId(r.id),
            job_type: r.job_type.clone(),
            state: r.state,
            attempts: r.attempts,
            max_attempts: r.max_attempts,
            fencing_token: FencingToken(r.fencing_token),
            last_error: r.last_error.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }))
    }
}

fn is_claimable(row: &Row, now: DateTime<Utc>) -> bool {
    match row.state {
        JobState::Queued => row.next_run_at.map(|run_at| run_at <= now).unwrap_or(true),
        JobState::Running => row.lease_expires_at.map(|exp| exp < now).unwrap_or(false),
        _ => false,
    }
}

fn has_any_ledger_entry(ledger: &HashSet<(Uuid, i64)>, job_id: Uuid) -> bool {
    ledger.iter().any(|(id, _)| *id == job_id)
}

/// Convenience constructor matching `Arc<InMemoryJobStore>`, the shape every
/// `JobStore` consumer in this workspace expects.
pub fn shared_store() -> Arc<InMemoryJobStore> {
    Arc::new(InMemoryJobStore::default())
}
