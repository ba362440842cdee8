//! End-to-end scenarios against the in-memory store double (§8).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use fenceq_testing::{InMemoryJobStore, ManualClock};

use crate::executor::{claim_and_execute, HandlerError, JobHandler, Outcome};
use crate::model::{ClaimedJob, LedgerEffect, Payload, SubmitRequest};
use crate::store::JobStore;

struct NoopHandler;

#[async_trait::async_trait]
impl JobHandler<()> for NoopHandler {
    async fn handle(&self, _job: &ClaimedJob, _deps: &()) -> Result<LedgerEffect, HandlerError> {
        Ok(LedgerEffect {
            account_id: "noop".into(),
            delta: 0,
        })
    }
}

/// Fails its first `fail_n_times` invocations, then succeeds — mirroring the
/// `fail_n_times` payload field from the original test suite.
struct FlakyHandler {
    fail_n_times: u32,
    invocations: AtomicU32,
}

impl FlakyHandler {
    fn new(fail_n_times: u32) -> Self {
        Self {
            fail_n_times,
            invocations: AtomicU32::new(0),
        }
    }
}

#[async_trait::async_trait]
impl JobHandler<()> for FlakyHandler {
    async fn handle(&self, _job: &ClaimedJob, _deps: &()) -> Result<LedgerEffect, HandlerError> {
        let attempt = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_n_times {
            Err(HandlerError::retryable(format!("simulated failure #{attempt}")))
        } else {
            Ok(LedgerEffect {
                account_id: "flaky".into(),
                delta: 1,
            })
        }
    }
}

struct AlwaysFailHandler;

#[async_trait::async_trait]
impl JobHandler<()> for AlwaysFailHandler {
    async fn handle(&self, _job: &ClaimedJob, _deps: &()) -> Result<LedgerEffect, HandlerError> {
        Err(HandlerError::retryable("always fails"))
    }
}

const LEASE: Duration = Duration::from_secs(30);

#[tokio::test]
async fn happy_path_succeeds_on_first_attempt() {
    let store = Arc::new(InMemoryJobStore::default());
    let job_id = store
        .submit(SubmitRequest::new("noop", Payload::empty()))
        .await
        .unwrap();

    let outcome = claim_and_execute(&store, "worker-a", LEASE, &NoopHandler, &())
        .await
        .unwrap()
        .expect("a job was claimable");

    assert!(matches!(outcome, Outcome::Succeeded));

    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.state.as_str(), "succeeded");
    assert_eq!(record.attempts, 1);
    assert_eq!(record.fencing_token.0, 1);
}

#[tokio::test]
async fn retry_then_succeed_matches_attempt_and_token_counts() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(InMemoryJobStore::new(clock.clone()));
    let job_id = store
        .submit(SubmitRequest::new("flaky", Payload::empty()).with_max_attempts(5))
        .await
        .unwrap();

    let handler = FlakyHandler::new(2);
    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let outcome = claim_and_execute(&store, "worker-a", LEASE, &handler, &())
            .await
            .unwrap()
            .expect("job stays claimable across retries");
        outcomes.push(matches!(outcome, Outcome::Succeeded));
        // Jump past the backoff window so the next claim sees it as eligible.
        clock.advance(ChronoDuration::seconds(60));
    }

    assert_eq!(outcomes, vec![false, false, true]);

    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.state.as_str(), "succeeded");
    assert_eq!(record.attempts, 3);
    assert_eq!(record.fencing_token.0, 3);
}

#[tokio::test]
async fn exhaustion_dead_letters_after_max_attempts() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(InMemoryJobStore::new(clock.clone()));
    let job_id = store
        .submit(
            SubmitRequest::new("always-fail", Payload::empty())
                .with_max_attempts(3),
        )
        .await
        .unwrap();

    let handler = AlwaysFailHandler;

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let outcome = claim_and_execute(&store, "worker-a", LEASE, &handler, &())
            .await
            .unwrap()
            .expect("job stays claimable until dead-lettered");
        outcomes.push(outcome);
        clock.advance(ChronoDuration::seconds(60));
    }

    assert!(matches!(outcomes[0], Outcome::Requeued { .. }));
    assert!(matches!(outcomes[1], Outcome::Requeued { .. }));
    assert!(matches!(outcomes[2], Outcome::DeadLettered));

    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.state.as_str(), "failed");
    assert_eq!(record.attempts, 3);
}

#[tokio::test]
async fn empty_queue_returns_none() {
    let store = Arc::new(InMemoryJobStore::default());
    let outcome = claim_and_execute(&store, "worker-a", LEASE, &NoopHandler, &())
        .await
        .unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn max_attempts_one_skips_retry_entirely() {
    let store = Arc::new(InMemoryJobStore::default());
    let job_id = store
        .submit(
            SubmitRequest::new("always-fail", Payload::empty())
                .with_max_attempts(1),
        )
        .await
        .unwrap();

    let outcome = claim_and_execute(&store, "worker-a", LEASE, &AlwaysFailHandler, &())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(outcome, Outcome::DeadLettered));
    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.attempts, 1);
    assert_eq!(record.state.as_str(), "failed");
}
