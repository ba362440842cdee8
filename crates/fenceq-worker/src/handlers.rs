//! Built-in demo handlers (`noop`, `flaky`) used by the crash/race test
//! suite and as a reference implementation for a real handler. The actual
//! business logic a deployment runs is out of scope (§1) — a production
//! worker would replace [`DemoHandler`] with its own [`JobHandler`].

use fenceq_core::{async_trait, ClaimedJob, HandlerError, JobHandler, LedgerEffect};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
struct FlakyPayload {
    #[serde(default)]
    fail_n_times: u32,
}

/// Dispatches on `job.job_type`. Unknown types are treated as non-retryable
/// handler errors rather than panicking — a real dispatcher would reject
/// submissions with unknown types before they ever reach the queue.
pub struct DemoHandler;

#[async_trait]
impl JobHandler<()> for DemoHandler {
    async fn handle(&self, job: &ClaimedJob, _deps: &()) -> Result<LedgerEffect, HandlerError> {
        match job.job_type.as_str() {
            "noop" => Ok(LedgerEffect {
                account_id: "noop".to_string(),
                delta: 0,
            }),
            "flaky" => {
                let flaky: FlakyPayload = job.payload.decode().unwrap_or_default();
                if job.attempts < flaky.fail_n_times as i32 {
                    Err(HandlerError::retryable(format!(
                        "simulated failure #{}",
                        job.attempts + 1
                    )))
                } else {
                    Ok(LedgerEffect {
                        account_id: "flaky".to_string(),
                        delta: 1,
                    })
                }
            }
            other => Err(HandlerError::non_retryable(format!("unknown job type: {other}"))),
        }
    }
}
