//! # fenceq-core
//!
//! A durable, at-least-once job execution kernel with exactly-once
//! side-effect semantics.
//!
//! ## Core Concepts
//!
//! - A [`crate::model::ClaimedJob`] is claimed under a [`crate::model::FencingToken`] — a lease
//!   generation that strictly increases on every successful claim.
//! - A [`executor::JobHandler`] runs once per attempt and returns the
//!   [`crate::model::LedgerEffect`] to commit.
//! - The [`executor::Executor`] fence-checks before and after the handler
//!   runs, then hands the result to [`store::JobStore::mark_succeeded`] or
//!   [`store::JobStore::mark_failed`].
//!
//! ## Key Invariants
//!
//! 1. `fencing_token` is non-decreasing per job; every successful claim
//!    strictly increases it by one.
//! 2. At most one ledger entry exists per `(job_id, fencing_token)`.
//! 3. `state = succeeded` implies at least one ledger entry exists.
//! 4. A write predicated on a stale token never reaches the store.
//!
//! ## What This Crate Is Not
//!
//! `fenceq-core` is **not**:
//! - a generic event bus or actor framework
//! - a priority queue or fair scheduler
//! - a streaming broker
//!
//! It **is**: the lease/fencing/apply/reconcile kernel that turns an
//! at-least-once relational store into an exactly-once job executor.

mod clock;
mod error;
mod executor;
mod model;
mod retry;
mod store;

#[cfg(test)]
mod executor_tests;

pub use clock::{Clock, SkewedClock, SystemClock};
pub use error::{ApplyError, ConfigError, ExecuteError, FenceError, StoreError, SubmitError};
pub use executor::{claim_and_execute, Executor, HandlerError, JobHandler, Outcome};
pub use model::{
    ClaimedJob, FailureKind, FailureOutcome, FencingToken, JobId, JobRecord, JobState, LedgerEffect,
    Payload, PayloadError, SubmitRequest,
};
pub use retry::{retry_delay_seconds, retry_delay_seconds_with_cap};
pub use store::JobStore;

// Re-export commonly used external types, matching the teacher's convention
// of re-exporting `async_trait` so downstream crates don't need their own
// dependency just to implement `JobStore`/`JobHandler`.
pub use async_trait::async_trait;
