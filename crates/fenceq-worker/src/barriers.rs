//! Store-backed rendezvous for crash/race tests that span two worker
//! processes (§6, the test-only `barriers` table). This is the
//! subprocess-level analog of `fenceq_testing::BarrierSet`, which only
//! coordinates tasks within one process.

use std::time::Duration;

use sqlx::PgPool;
use tracing::info;

pub async fn open(pool: &PgPool, name: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO barriers (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;
    info!(barrier = name, "barrier_open");
    Ok(())
}

/// Polls until `name` is opened or `timeout` elapses.
pub async fn wait(pool: &PgPool, name: &str, timeout: Duration) -> Result<bool, sqlx::Error> {
    info!(barrier = name, "barrier_wait");
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let exists: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM barriers WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await?;

        if exists.is_some() {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
