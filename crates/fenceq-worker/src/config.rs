use std::env;
use std::time::Duration;

use fenceq_core::ConfigError;

/// Crash injection points from `CRASH_AT` (§6). Each names the moment in the
/// claim/execute/apply sequence after which the worker process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    AfterLeaseAcquire,
    MidExecute,
    BeforeCommit,
    AfterCommit,
}

impl CrashPoint {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "after_lease_acquire" => Ok(Self::AfterLeaseAcquire),
            "mid_execute" => Ok(Self::MidExecute),
            "before_commit" => Ok(Self::BeforeCommit),
            "after_commit" => Ok(Self::AfterCommit),
            other => Err(ConfigError::Invalid {
                name: "CRASH_AT".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Hooks used only by the crash/race test harness; absent in production.
#[derive(Debug, Clone, Default)]
pub struct TestHooks {
    pub crash_at: Option<CrashPoint>,
    pub clock_skew_ms: i64,
    pub barrier_wait: Option<String>,
    pub barrier_open: Option<String>,
    pub barrier_timeout: Duration,
    pub max_loops: Option<u64>,
    pub exit_on_success: bool,
    pub exit_on_stale: bool,
    pub claim_job_id: Option<uuid::Uuid>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub lease_duration: Duration,
    pub max_attempts_default: i32,
    pub poll_interval: Duration,
    pub hooks: TestHooks,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL".to_string()))?;

        let lease_seconds = parse_u64("LEASE_SECONDS", 30)?;
        let max_attempts_default = parse_i32("MAX_ATTEMPTS_DEFAULT", 3)?;

        let hooks = TestHooks {
            crash_at: match env::var("CRASH_AT") {
                Ok(raw) => Some(CrashPoint::parse(&raw)?),
                Err(_) => None,
            },
            clock_skew_ms: parse_i64("CLOCK_SKEW_MS", 0)?,
            barrier_wait: env::var("BARRIER_WAIT").ok(),
            barrier_open: env::var("BARRIER_OPEN").ok(),
            barrier_timeout: Duration::from_secs(parse_u64("BARRIER_TIMEOUT_S", 30)?),
            max_loops: match env::var("MAX_LOOPS") {
                Ok(raw) => Some(
                    raw.parse()
                        .map_err(|_| invalid("MAX_LOOPS", &raw))?,
                ),
                Err(_) => None,
            },
            exit_on_success: parse_bool("EXIT_ON_SUCCESS", false)?,
            exit_on_stale: parse_bool("EXIT_ON_STALE", false)?,
            claim_job_id: match env::var("CLAIM_JOB_ID") {
                Ok(raw) => Some(raw.parse().map_err(|_| invalid("CLAIM_JOB_ID", &raw))?),
                Err(_) => None,
            },
        };

        Ok(Self {
            database_url,
            lease_duration: Duration::from_secs(lease_seconds),
            max_attempts_default,
            poll_interval: Duration::from_millis(200),
            hooks,
        })
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| invalid(key, &raw)),
        Err(_) => Ok(default),
    }
}

fn parse_i64(key: &str, default: i64) -> Result<i64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| invalid(key, &raw)),
        Err(_) => Ok(default),
    }
}

fn parse_i32(key: &str, default: i32) -> Result<i32, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| invalid(key, &raw)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.as_str() {
            "1" | "true" | "TRUE" => Ok(true),
            "0" | "false" | "FALSE" => Ok(false),
            _ => Err(invalid(key, &raw)),
        },
        Err(_) => Ok(default),
    }
}
