use std::env;
use std::time::Duration;

use fenceq_core::ConfigError;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub database_url: String,
    pub batch_size: i64,
    pub sleep_interval: Duration,
}

impl ReconcilerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL".to_string()))?;

        let batch_size = parse_i64("RECONCILE_BATCH_SIZE", 100)?;
        let sleep_seconds = parse_u64("RECONCILE_SLEEP_SECONDS", 5)?;

        Ok(Self {
            database_url,
            batch_size,
            sleep_interval: Duration::from_secs(sleep_seconds),
        })
    }
}

fn parse_i64(key: &str, default: i64) -> Result<i64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| invalid(key, &raw)),
        Err(_) => Ok(default),
    }
}

fn parse_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| invalid(key, &raw)),
        Err(_) => Ok(default),
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
    }
}
