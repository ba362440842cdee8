//! Mirrors `test_reconciler.py`: a job whose ledger entry committed but
//! whose row never converged to `succeeded` (a crash between the two
//! writes) must be repaired by the reconciler sweep.

mod support;

use fenceq_core::{JobStore, Payload, SubmitRequest};

#[tokio::test]
async fn reconciler_repairs_incomplete_state() {
    let Some(store) = support::test_store().await else {
        eprintln!("skipping: DATABASE_URL is not set or Postgres is unreachable");
        return;
    };
    support::reset_database(store.pool()).await;

    let job_id = store
        .submit(SubmitRequest::new("crash-window", Payload::empty()))
        .await
        .expect("submit should succeed");

    // Simulate the crash window: the ledger insert committed, but the
    // job row update that would have followed it never ran.
    sqlx::query("UPDATE jobs SET state = 'running', fencing_token = 1 WHERE id = $1")
        .bind(job_id.0)
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO ledger_entries (job_id, fencing_token, account_id, delta) VALUES ($1, 1, 'test', 1)",
    )
    .bind(job_id.0)
    .execute(store.pool())
    .await
    .unwrap();

    let repaired = store.reconcile(100).await.expect("reconcile should succeed");
    assert!(repaired.iter().any(|id| *id == job_id));

    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.state.as_str(), "succeeded");
}

#[tokio::test]
async fn reconciler_ignores_jobs_without_a_ledger_entry() {
    let Some(store) = support::test_store().await else {
        eprintln!("skipping: DATABASE_URL is not set or Postgres is unreachable");
        return;
    };
    support::reset_database(store.pool()).await;

    let job_id = store
        .submit(SubmitRequest::new("still-running", Payload::empty()))
        .await
        .expect("submit should succeed");
    store
        .claim("worker-a", std::time::Duration::from_secs(30))
        .await
        .unwrap();

    let repaired = store.reconcile(100).await.expect("reconcile should succeed");
    assert!(!repaired.iter().any(|id| *id == job_id));

    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.state.as_str(), "running");
}
