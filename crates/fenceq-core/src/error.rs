//! Error taxonomy (§7). Each component boundary gets its own enum rather
//! than one catch-all — the Executor composes them, it does not flatten them.

use thiserror::Error;

/// Errors from the transactional store itself: connection loss, deadlocks,
/// anything that warrants a caller-side backoff-and-retry of the whole
/// operation rather than a semantic decision.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store returned unexpected data: {0}")]
    InvariantViolation(String),
}

/// Submission-path errors (§4.1). Never retried internally.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("idempotency key already used with a different payload")]
    IdempotencyConflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fence-check failures (§4.4). Expected under contention; the caller must
/// abort the attempt without charging it as a handler failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FenceError {
    #[error("fencing token is stale")]
    StaleToken,
    #[error("lease has expired")]
    LeaseExpired,
}

impl FenceError {
    /// The `reason` field of the `stale_write_blocked` observability event.
    pub fn reason(self) -> &'static str {
        match self {
            FenceError::StaleToken => "token_mismatch",
            FenceError::LeaseExpired => "lease_expired",
        }
    }
}

/// Applier failures (§4.5). Only the token fence can reject an apply; lease
/// expiry is irrelevant once the handler has produced a result to commit.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("fencing token is stale")]
    StaleToken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything that can abort one execution attempt end to end.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Fence(#[from] FenceError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("handler failed: {0}")]
    Handler(String),
}

/// Typed environment configuration failures (§4.9).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),
    #[error("invalid value for environment variable {name}: {value:?}")]
    Invalid { name: String, value: String },
}
