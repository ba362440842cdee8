//! The claim/execute/apply worker loop (§9 "concurrent-loop shape").
//!
//! Outside of the crash/race test hooks, this is a plain cooperative loop:
//! claim a job, run it through the [`Executor`], sleep if the queue was
//! empty, repeat.

mod barriers;
mod config;
mod handlers;

use std::sync::Arc;

use config::{CrashPoint, WorkerConfig};
use fenceq_core::{Clock, Executor, JobStore, Outcome, SkewedClock, SystemClock};
use fenceq_postgres::PgJobStore;
use handlers::DemoHandler;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "fenceq_worker=info".to_string()))
        .init();

    let config = WorkerConfig::from_env()?;
    let worker_id = Uuid::new_v4().to_string();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let clock: Arc<dyn Clock> = if config.hooks.clock_skew_ms != 0 {
        Arc::new(SkewedClock::with_skew_ms(config.hooks.clock_skew_ms))
    } else {
        Arc::new(SystemClock)
    };

    let store = Arc::new(
        PgJobStore::new(pool)
            .with_default_max_attempts(config.max_attempts_default)
            .with_clock(clock),
    );
    store.run_migrations().await?;

    if let Some(name) = &config.hooks.barrier_open {
        // Opened after the lease is acquired below, not here; see the loop.
        info!(barrier = %name, "configured to open a barrier after lease acquisition");
    }

    run_loop(store, &worker_id, &config).await
}

async fn run_loop(store: Arc<PgJobStore>, worker_id: &str, config: &WorkerConfig) -> anyhow::Result<()> {
    let handler = DemoHandler;
    let mut loops = 0u64;

    loop {
        if let Some(max_loops) = config.hooks.max_loops {
            if loops >= max_loops {
                info!(reason = "max_loops_reached", "worker_exit");
                return Ok(());
            }
        }
        loops += 1;

        if let Some(name) = &config.hooks.barrier_wait {
            barriers::wait(store.pool(), name, config.hooks.barrier_timeout).await?;
        }

        let Some(claimed) = store.claim(worker_id, config.lease_duration).await? else {
            tokio::time::sleep(config.poll_interval).await;
            continue;
        };

        if let Some(job_id) = config.hooks.claim_job_id {
            if claimed.id.0 != job_id {
                warn!(job_id = %claimed.id, "claimed a job other than CLAIM_JOB_ID; exiting");
                return Ok(());
            }
        }

        info!(job_id = %claimed.id, token = %claimed.token, %worker_id, "lease_acquired");

        if let Some(name) = &config.hooks.barrier_open {
            barriers::open(store.pool(), name).await?;
        }

        if config.hooks.crash_at == Some(CrashPoint::AfterLeaseAcquire) {
            info!(job_id = %claimed.id, point = "after_lease_acquire", "crash_injected");
            std::process::exit(1);
        }

        // The crash points between fence-check and commit require splitting
        // the applier in two; the plain path below goes through one atomic
        // `Executor::execute` call, matching the production protocol.
        let outcome = if config.hooks.crash_at == Some(CrashPoint::MidExecute)
            || config.hooks.crash_at == Some(CrashPoint::BeforeCommit)
        {
            run_with_apply_split(&store, &claimed, config).await?
        } else {
            let executor = Executor::new(Arc::clone(&store));
            executor.execute(claimed, &handler, &()).await?
        };

        match outcome {
            Outcome::Succeeded => {
                if config.hooks.crash_at == Some(CrashPoint::AfterCommit) {
                    info!(point = "after_commit", "crash_injected");
                    std::process::exit(1);
                }
                if config.hooks.exit_on_success {
                    info!(reason = "exit_on_success", "worker_exit");
                    return Ok(());
                }
            }
            Outcome::Aborted(_) => {
                if config.hooks.exit_on_stale {
                    info!(reason = "exit_on_stale", "worker_exit");
                    return Ok(());
                }
            }
            Outcome::Requeued { .. } | Outcome::DeadLettered | Outcome::Skipped => {}
        }
    }
}

/// Drives the same fence-check → handle → re-fence → apply protocol as
/// [`Executor::execute`], but with the applier split across two
/// transactions so `CRASH_AT` can land between the ledger write and the
/// job's state convergence.
async fn run_with_apply_split(
    store: &Arc<PgJobStore>,
    claimed: &fenceq_core::ClaimedJob,
    config: &WorkerConfig,
) -> anyhow::Result<Outcome> {
    use fenceq_core::JobHandler;

    if let Err(fence_err) = store.assert_fence(claimed.id, claimed.token).await {
        warn!(job_id = %claimed.id, reason = fence_err.reason(), "stale_write_blocked");
        return Ok(Outcome::Aborted(fence_err));
    }

    info!(job_id = %claimed.id, token = %claimed.token, job_type = %claimed.job_type, "execution_started");

    if config.hooks.crash_at == Some(CrashPoint::MidExecute) {
        info!(job_id = %claimed.id, point = "mid_execute", "crash_injected");
        std::process::exit(1);
    }

    let handler = DemoHandler;
    let result = handler.handle(claimed, &()).await;

    if let Err(fence_err) = store.assert_fence(claimed.id, claimed.token).await {
        warn!(job_id = %claimed.id, reason = fence_err.reason(), "stale_write_blocked");
        return Ok(Outcome::Aborted(fence_err));
    }

    let effect = match result {
        Ok(effect) => effect,
        Err(handler_err) => {
            let outcome = store
                .mark_failed(claimed.id, claimed.token, handler_err.kind, &handler_err.message)
                .await?;
            return Ok(match outcome {
                fenceq_core::FailureOutcome::Requeued { delay_seconds } => Outcome::Requeued { delay_seconds },
                fenceq_core::FailureOutcome::DeadLettered => Outcome::DeadLettered,
                fenceq_core::FailureOutcome::Skipped => Outcome::Skipped,
            });
        }
    };

    store.insert_ledger_entry(claimed.id, claimed.token, effect).await?;

    if config.hooks.crash_at == Some(CrashPoint::BeforeCommit) {
        info!(job_id = %claimed.id, point = "before_commit", "crash_injected");
        std::process::exit(1);
    }

    store.converge_succeeded(claimed.id, claimed.token).await?;
    Ok(Outcome::Succeeded)
}
