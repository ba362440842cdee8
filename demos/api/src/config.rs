use std::env;
use std::net::SocketAddr;

use fenceq_core::ConfigError;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub max_attempts_default: i32,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL".to_string()))?;

        let bind_addr_raw = env::var("API_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let bind_addr = bind_addr_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "API_BIND_ADDR".to_string(),
            value: bind_addr_raw,
        })?;

        Ok(Self {
            bind_addr,
            database_url,
            max_attempts_default: match env::var("MAX_ATTEMPTS_DEFAULT") {
                Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                    name: "MAX_ATTEMPTS_DEFAULT".to_string(),
                    value: raw,
                })?,
                Err(_) => 3,
            },
        })
    }
}
