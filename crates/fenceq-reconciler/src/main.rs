//! §4.7 Reconciler — the only component that may converge a job's state
//! without holding its lease. Sweeps jobs whose ledger entry committed but
//! whose row never reached `succeeded`.

mod config;

use config::ReconcilerConfig;
use fenceq_core::JobStore;
use fenceq_postgres::PgJobStore;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "fenceq_reconciler=info".to_string()))
        .init();

    let config = ReconcilerConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await?;

    let store = PgJobStore::new(pool);
    store.run_migrations().await?;

    loop {
        match store.reconcile(config.batch_size).await {
            Ok(repaired) if !repaired.is_empty() => {
                info!(count = repaired.len(), ids = ?repaired, "reconciler_repaired");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "reconcile pass failed, backing off");
            }
        }

        tokio::time::sleep(config.sleep_interval).await;
    }
}
