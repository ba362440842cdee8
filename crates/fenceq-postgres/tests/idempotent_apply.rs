//! Mirrors `test_idempotent_apply.py`: applying the same `(job_id, token)`
//! twice must leave exactly one ledger row and must not double-count the
//! job's attempt budget.

mod support;

use fenceq_core::{JobStore, LedgerEffect, Payload, SubmitRequest};

#[tokio::test]
async fn applying_the_same_token_twice_is_idempotent() {
    let Some(store) = support::test_store().await else {
        eprintln!("skipping: DATABASE_URL is not set or Postgres is unreachable");
        return;
    };
    support::reset_database(store.pool()).await;

    let job_id = store
        .submit(SubmitRequest::new("apply-twice", Payload::empty()))
        .await
        .expect("submit should succeed");

    let claimed = store
        .claim("worker-a", std::time::Duration::from_secs(30))
        .await
        .expect("claim should succeed")
        .expect("job should be claimable");

    let effect = LedgerEffect {
        account_id: "test".into(),
        delta: 1,
    };

    store
        .mark_succeeded(job_id, claimed.token, effect.clone())
        .await
        .expect("first apply should succeed");
    store
        .mark_succeeded(job_id, claimed.token, effect)
        .await
        .expect("replayed apply under the same token should also succeed");

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ledger_entries WHERE job_id = $1 AND fencing_token = $2",
    )
    .bind(job_id.0)
    .bind(claimed.token.0)
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(count, 1);

    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.state.as_str(), "succeeded");
    assert_eq!(record.attempts, 1, "a replayed apply must not charge a second attempt");
}
