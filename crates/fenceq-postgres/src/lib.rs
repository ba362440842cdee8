//! PostgreSQL implementation of the fenceq job store.
//!
//! This crate provides the production `JobStore` implementation: the
//! lease/fencing claim, the exactly-once applier, the retry scheduler, and
//! the reconciler, all expressed as single-statement `FOR UPDATE SKIP
//! LOCKED` transactions so concurrent workers never block or collide.
//!
//! # Database Schema
//!
//! See `migrations/0001_init.sql` at the workspace root for the canonical
//! schema. In short:
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id               UUID PRIMARY KEY,
//!     type             TEXT NOT NULL,
//!     payload          JSONB NOT NULL,
//!     idempotency_key  TEXT,
//!     payload_hash     TEXT,
//!     state            TEXT NOT NULL DEFAULT 'queued',
//!     attempts         INTEGER NOT NULL DEFAULT 0,
//!     max_attempts     INTEGER NOT NULL DEFAULT 3,
//!     lease_owner      TEXT,
//!     lease_expires_at TIMESTAMPTZ,
//!     fencing_token    BIGINT NOT NULL DEFAULT 0,
//!     next_run_at      TIMESTAMPTZ,
//!     last_error       TEXT,
//!     created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE ledger_entries (
//!     job_id        UUID NOT NULL REFERENCES jobs (id),
//!     fencing_token BIGINT NOT NULL,
//!     account_id    TEXT NOT NULL,
//!     delta         BIGINT NOT NULL,
//!     applied_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     PRIMARY KEY (job_id, fencing_token)
//! );
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use fenceq_postgres::PgJobStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/fenceq").await?;
//! let store = PgJobStore::new(pool);
//! store.run_migrations().await?;
//! ```

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fenceq_core::{
    ApplyError, ClaimedJob, Clock, FailureKind, FailureOutcome, FenceError, FencingToken, JobId,
    JobRecord, JobState, JobStore, LedgerEffect, Payload, StoreError, SubmitError, SubmitRequest,
    SystemClock,
};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// PostgreSQL job store implementation.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    default_max_attempts: i32,
    clock: Arc<dyn Clock>,
}

impl PgJobStore {
    /// Create a new store. Jobs submitted without an explicit
    /// `max_attempts` get the default of 3 (`MAX_ATTEMPTS_DEFAULT`, §6).
    ///
    /// Uses [`SystemClock`] until [`PgJobStore::with_clock`] overrides it;
    /// see that method for why this clock never affects fencing.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            default_max_attempts: 3,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_default_max_attempts(mut self, max_attempts: i32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    /// Overrides the clock used to compute `lease_expires_at` and
    /// `next_run_at` values sent to the store (`CLOCK_SKEW_MS`, §6). All
    /// eligibility and expiry comparisons still happen against the store's
    /// own `NOW()`, so skewing this clock can only shift when a job becomes
    /// eligible again — it can never let a stale token pass `assert_fence`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies every migration under `migrations/` that hasn't already run.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

fn store_unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

impl PgJobStore {
    /// Test-harness-only: the ledger-insert half of `mark_succeeded`,
    /// committed on its own so `CRASH_AT=before_commit` can kill the worker
    /// process between this and [`PgJobStore::converge_succeeded`] to
    /// reproduce the crash window §4.5 and §4.7 describe. Production code
    /// must go through `mark_succeeded`, which performs both halves
    /// atomically.
    pub async fn insert_ledger_entry(
        &self,
        job_id: JobId,
        token: FencingToken,
        effect: LedgerEffect,
    ) -> Result<(), ApplyError> {
        let current: Option<(i64,)> = sqlx::query_as("SELECT fencing_token FROM jobs WHERE id = $1")
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ApplyError::Store(store_unavailable(e)))?;

        match current {
            Some((stored_token,)) if stored_token == token.0 => {}
            _ => return Err(ApplyError::StaleToken),
        }

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (job_id, fencing_token, account_id, delta)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_id, fencing_token) DO NOTHING
            "#,
        )
        .bind(job_id.0)
        .bind(token.0)
        .bind(&effect.account_id)
        .bind(effect.delta)
        .execute(&self.pool)
        .await
        .map_err(|e| ApplyError::Store(store_unavailable(e)))?;

        Ok(())
    }

    /// Test-harness-only: the conditional job-state-update half of
    /// `mark_succeeded`. See [`PgJobStore::insert_ledger_entry`].
    pub async fn converge_succeeded(&self, job_id: JobId, token: FencingToken) -> Result<(), ApplyError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'succeeded',
                attempts = attempts + 1,
                lease_owner = NULL,
                lease_expires_at = NULL,
                next_run_at = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND fencing_token = $2
              AND state <> 'succeeded'
              AND EXISTS (
                  SELECT 1 FROM ledger_entries WHERE job_id = $1 AND fencing_token = $2
              )
            "#,
        )
        .bind(job_id.0)
        .bind(token.0)
        .execute(&self.pool)
        .await
        .map_err(|e| ApplyError::Store(store_unavailable(e)))?;

        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn submit(&self, request: SubmitRequest) -> Result<JobId, SubmitError> {
        let job_id = Uuid::new_v4();
        let max_attempts = request.max_attempts.unwrap_or(self.default_max_attempts);
        let payload_hash = request.payload.hash();

        let mut tx = self.pool.begin().await.map_err(store_unavailable)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (id, type, payload, idempotency_key, payload_hash, state, fencing_token, attempts, max_attempts)
            VALUES ($1, $2, $3, $4, $5, 'queued', 0, 0, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(&request.job_type)
        .bind(&request.payload.0)
        .bind(&request.idempotency_key)
        .bind(&payload_hash)
        .bind(max_attempts)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_unavailable)?;

        let result = match inserted {
            Some(row) => Ok(JobId(row.get("id"))),
            None => {
                // Unique constraint on idempotency_key fired: either a
                // concurrent submitter won the race, or this is a replay.
                let Some(key) = request.idempotency_key.as_deref() else {
                    return Err(SubmitError::Store(StoreError::InvariantViolation(
                        "idempotency insert conflicted on a request with no idempotency_key".to_string(),
                    )));
                };

                let existing = sqlx::query("SELECT id, payload_hash FROM jobs WHERE idempotency_key = $1")
                    .bind(key)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(store_unavailable)?;

                let existing_hash: Option<String> = existing.get("payload_hash");
                if existing_hash.as_deref() == Some(payload_hash.as_str()) {
                    Ok(JobId(existing.get("id")))
                } else {
                    Err(SubmitError::IdempotencyConflict)
                }
            }
        };

        tx.commit().await.map_err(store_unavailable)?;
        result
    }

    async fn claim(&self, worker_id: &str, lease_duration: StdDuration) -> Result<Option<ClaimedJob>, StoreError> {
        let lease_expires_at = self.clock.now()
            + Duration::from_std(lease_duration).map_err(|e| StoreError::InvariantViolation(e.to_string()))?;

        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM jobs
                WHERE (state = 'queued' AND (next_run_at IS NULL OR next_run_at <= NOW()))
                   OR (state = 'running' AND lease_expires_at < NOW())
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET state = 'running',
                lease_owner = $1,
                lease_expires_at = $2,
                fencing_token = fencing_token + 1,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM claimable)
            RETURNING id, type, payload, attempts, max_attempts, fencing_token
            "#,
        )
        .bind(worker_id)
        .bind(lease_expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload_json: serde_json::Value = row.get("payload");

        Ok(Some(ClaimedJob {
            id: JobId(row.get("id")),
            token: FencingToken(row.get("fencing_token")),
            job_type: row.get("type"),
            payload: Payload(payload_json),
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
        }))
    }

    async fn assert_fence(&self, job_id: JobId, token: FencingToken) -> Result<(), FenceError> {
        let row = sqlx::query(
            r#"
            SELECT fencing_token,
                   (lease_expires_at IS NOT NULL AND lease_expires_at < NOW()) AS expired
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| FenceError::StaleToken)?;

        let Some(row) = row else {
            return Err(FenceError::StaleToken);
        };

        let stored_token: i64 = row.get("fencing_token");
        if stored_token != token.0 {
            return Err(FenceError::StaleToken);
        }

        let expired: bool = row.get("expired");
        if expired {
            return Err(FenceError::LeaseExpired);
        }

        Ok(())
    }

    async fn mark_succeeded(
        &self,
        job_id: JobId,
        token: FencingToken,
        effect: LedgerEffect,
    ) -> Result<(), ApplyError> {
        let mut tx = self.pool.begin().await.map_err(|e| ApplyError::Store(store_unavailable(e)))?;

        let current: Option<(i64,)> = sqlx::query_as("SELECT fencing_token FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ApplyError::Store(store_unavailable(e)))?;

        let Some((stored_token,)) = current else {
            return Err(ApplyError::StaleToken);
        };
        if stored_token != token.0 {
            return Err(ApplyError::StaleToken);
        }

        // `attempts` advances only on the insert that actually lands — a
        // replayed apply with the same (job_id, token) must converge the
        // job to `succeeded` without charging a second attempt (I2/I3).
        sqlx::query(
            r#"
            WITH ins AS (
                INSERT INTO ledger_entries (job_id, fencing_token, account_id, delta)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (job_id, fencing_token) DO NOTHING
                RETURNING 1
            )
            UPDATE jobs
            SET state = 'succeeded',
                attempts = attempts + (SELECT COUNT(*)::int FROM ins),
                lease_owner = NULL,
                lease_expires_at = NULL,
                next_run_at = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND fencing_token = $2
              AND EXISTS (
                  SELECT 1 FROM ledger_entries WHERE job_id = $1 AND fencing_token = $2
              )
            "#,
        )
        .bind(job_id.0)
        .bind(token.0)
        .bind(&effect.account_id)
        .bind(effect.delta)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApplyError::Store(store_unavailable(e)))?;

        tx.commit().await.map_err(|e| ApplyError::Store(store_unavailable(e)))?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: JobId,
        token: FencingToken,
        kind: FailureKind,
        error: &str,
    ) -> Result<FailureOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_unavailable)?;

        let current: Option<(i32, i32)> = sqlx::query_as(
            "SELECT attempts, max_attempts FROM jobs WHERE id = $1 AND state = 'running' AND fencing_token = $2 FOR UPDATE",
        )
        .bind(job_id.0)
        .bind(token.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_unavailable)?;

        let Some((attempts, max_attempts)) = current else {
            tx.commit().await.map_err(store_unavailable)?;
            return Ok(FailureOutcome::Skipped);
        };

        let new_attempts = attempts + 1;

        if kind == FailureKind::NonRetryable || new_attempts >= max_attempts {
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'failed',
                    attempts = $3,
                    last_error = $4,
                    lease_owner = NULL,
                    lease_expires_at = NULL,
                    next_run_at = NULL,
                    updated_at = NOW()
                WHERE id = $1 AND fencing_token = $2
                "#,
            )
            .bind(job_id.0)
            .bind(token.0)
            .bind(new_attempts)
            .bind(error)
            .execute(&mut *tx)
            .await
            .map_err(store_unavailable)?;

            tx.commit().await.map_err(store_unavailable)?;
            return Ok(FailureOutcome::DeadLettered);
        }

        let delay_seconds = fenceq_core::retry_delay_seconds(new_attempts);
        let next_run_at: DateTime<Utc> = self.clock.now() + Duration::seconds(delay_seconds);

        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'queued',
                attempts = $3,
                last_error = $4,
                next_run_at = $5,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND fencing_token = $2
            "#,
        )
        .bind(job_id.0)
        .bind(token.0)
        .bind(new_attempts)
        .bind(error)
        .bind(next_run_at)
        .execute(&mut *tx)
        .await
        .map_err(store_unavailable)?;

        tx.commit().await.map_err(store_unavailable)?;
        Ok(FailureOutcome::Requeued { delay_seconds })
    }

    async fn reconcile(&self, batch_size: i64) -> Result<Vec<JobId>, StoreError> {
        let rows = sqlx::query(
            r#"
            WITH candidates AS (
                SELECT j.id
                FROM jobs j
                WHERE j.state <> 'succeeded'
                  AND EXISTS (SELECT 1 FROM ledger_entries l WHERE l.job_id = j.id)
                ORDER BY j.updated_at NULLS FIRST
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET state = 'succeeded',
                lease_owner = NULL,
                lease_expires_at = NULL,
                next_run_at = NULL,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM candidates)
            RETURNING id
            "#,
        )
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(store_unavailable)?;

        Ok(rows.into_iter().map(|row| JobId(row.get("id"))).collect())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, type, state, attempts, max_attempts, fencing_token, last_error, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_str: String = row.get("state");
        let state: JobState = state_str
            .parse()
            .map_err(StoreError::InvariantViolation)?;

        Ok(Some(JobRecord {
            id: JobId(row.get("id")),
            job_type: row.get("type"),
            state,
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            fencing_token: FencingToken(row.get("fencing_token")),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }
}
