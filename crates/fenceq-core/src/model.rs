//! Domain types shared by every `JobStore` implementation.
//!
//! The payload is kept as an opaque structured value at this layer (see the
//! module doc on [`Payload`]) — handlers are responsible for projecting it
//! into their own typed view.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Globally unique job identifier, assigned at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A lease generation counter. Strictly increases by one on every successful
/// claim (I1); never decreases. Starts at 0 on insert, so the first claim
/// produces token 1 and the first ledger key is `(job_id, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FencingToken(pub i64);

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Opaque structured payload. Handlers decode their own typed view out of it
/// with [`Payload::decode`] rather than the core ever matching on its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload(pub serde_json::Value);

impl Payload {
    pub fn empty() -> Self {
        Self(serde_json::json!({}))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        serde_json::from_value(self.0.clone()).map_err(PayloadError::Decode)
    }

    /// Deterministic hash used to detect idempotency-key reuse with a
    /// different payload. Keyed on the canonical `serde_json` serialization,
    /// which is stable for a given `Value` tree.
    pub fn hash(&self) -> String {
        let bytes = serde_json::to_vec(&self.0).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        format!("{:x}", digest)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload does not match the handler's expected shape: {0}")]
    Decode(serde_json::Error),
}

/// One of the five legal job states (§3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(format!("unrecognized job state: {other}")),
        }
    }
}

/// A caller's request to submit a job (§4.1).
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub job_type: String,
    pub payload: Payload,
    pub idempotency_key: Option<String>,
    pub max_attempts: Option<i32>,
}

impl SubmitRequest {
    pub fn new(job_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            idempotency_key: None,
            max_attempts: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// The subset of a job's row handed to the executor after a successful claim.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub token: FencingToken,
    pub job_type: String,
    pub payload: Payload,
    pub attempts: i32,
    pub max_attempts: i32,
}

/// A full, read-only snapshot of a job row, e.g. for `GET /jobs/{id}`.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub state: JobState,
    pub attempts: i32,
    pub max_attempts: i32,
    pub fencing_token: FencingToken,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The side-effect payload recorded alongside a successful apply. The core
/// treats it as opaque (§4.5); it exists only so exactly one row per
/// `(job_id, fencing_token)` is the thing being guaranteed.
#[derive(Debug, Clone)]
pub struct LedgerEffect {
    pub account_id: String,
    pub delta: i64,
}

/// Why a handler attempt failed to progress the job (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying with backoff.
    Retryable,
    /// Never worth retrying; charge the attempt budget immediately.
    NonRetryable,
}

/// What a `mark_failed` call actually did, so callers (and tests) can tell a
/// real transition from the silent no-op case (§4.6: "gated on the job
/// still being in running with the caller's token").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Budget remained; job is back in `queued` with `next_run_at` set.
    Requeued { delay_seconds: i64 },
    /// Budget exhausted, or the failure was non-retryable; job is `failed`.
    DeadLettered,
    /// No-op: the job was no longer `running` under this token.
    Skipped,
}
