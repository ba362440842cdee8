//! Submission-path idempotency (§4.1): same key + same payload yields one
//! job id; same key + a different payload is a hard conflict.

mod support;

use fenceq_core::{JobStore, Payload, SubmitError, SubmitRequest};

#[tokio::test]
async fn same_key_and_payload_returns_the_same_job_id() {
    let Some(store) = support::test_store().await else {
        eprintln!("skipping: DATABASE_URL is not set or Postgres is unreachable");
        return;
    };
    support::reset_database(store.pool()).await;

    let payload = Payload(serde_json::json!({"to": "a@example.com"}));
    let first = store
        .submit(SubmitRequest::new("send-email", payload.clone()).with_idempotency_key("req-1"))
        .await
        .unwrap();
    let second = store
        .submit(SubmitRequest::new("send-email", payload).with_idempotency_key("req-1"))
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn same_key_with_a_different_payload_is_a_conflict() {
    let Some(store) = support::test_store().await else {
        eprintln!("skipping: DATABASE_URL is not set or Postgres is unreachable");
        return;
    };
    support::reset_database(store.pool()).await;

    store
        .submit(
            SubmitRequest::new("send-email", Payload(serde_json::json!({"to": "a@example.com"})))
                .with_idempotency_key("req-2"),
        )
        .await
        .unwrap();

    let result = store
        .submit(
            SubmitRequest::new("send-email", Payload(serde_json::json!({"to": "b@example.com"})))
                .with_idempotency_key("req-2"),
        )
        .await;

    assert!(matches!(result, Err(SubmitError::IdempotencyConflict)));
}

#[tokio::test]
async fn jobs_without_an_idempotency_key_never_collide() {
    let Some(store) = support::test_store().await else {
        eprintln!("skipping: DATABASE_URL is not set or Postgres is unreachable");
        return;
    };
    support::reset_database(store.pool()).await;

    let payload = Payload::empty();
    let first = store
        .submit(SubmitRequest::new("noop", payload.clone()))
        .await
        .unwrap();
    let second = store.submit(SubmitRequest::new("noop", payload)).await.unwrap();

    assert_ne!(first, second);
}
