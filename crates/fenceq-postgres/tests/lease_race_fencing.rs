//! Mirrors `test_lease_race_fencing.py`: a short lease expires mid-flight,
//! a second worker reclaims the job, and the first worker's stale token
//! must be rejected rather than allowed to double-apply.

mod support;

use std::time::Duration;

use fenceq_core::{FenceError, JobStore, LedgerEffect, Payload, SubmitRequest};

#[tokio::test]
async fn lease_expiry_race_is_blocked_by_fencing() {
    let Some(store) = support::test_store().await else {
        eprintln!("skipping: DATABASE_URL is not set or Postgres is unreachable");
        return;
    };
    support::reset_database(store.pool()).await;

    let job_id = store
        .submit(SubmitRequest::new("race", Payload::empty()).with_max_attempts(5))
        .await
        .expect("submit should succeed");

    // Worker A claims with a 1-second lease.
    let claimed_a = store
        .claim("worker-a", Duration::from_secs(1))
        .await
        .expect("claim should succeed")
        .expect("job should be claimable");
    assert_eq!(claimed_a.token.0, 1);

    // Let the lease expire.
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    // Worker B reclaims the expired lease.
    let claimed_b = store
        .claim("worker-b", Duration::from_secs(30))
        .await
        .expect("claim should succeed")
        .expect("expired lease should be reclaimable");
    assert_eq!(claimed_b.token.0, 2);

    // Worker A's token is now stale; its fence-check must reject it.
    let fence_result = store.assert_fence(job_id, claimed_a.token).await;
    assert_eq!(fence_result.unwrap_err(), FenceError::StaleToken);

    // Worker B applies successfully under its fresh token.
    store
        .mark_succeeded(
            job_id,
            claimed_b.token,
            LedgerEffect {
                account_id: "test".into(),
                delta: 1,
            },
        )
        .await
        .expect("apply under the current token should succeed");

    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.state.as_str(), "succeeded");
    assert!(record.fencing_token.0 >= 2);

    let (count, min_token, max_token): (i64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), MIN(fencing_token), MAX(fencing_token) FROM ledger_entries WHERE job_id = $1",
    )
    .bind(job_id.0)
    .fetch_one(store.pool())
    .await
    .unwrap();

    assert_eq!(count, 1);
    assert_eq!(min_token, max_token);
    assert!(min_token >= 2);
}
