//! Demo HTTP submission surface. Out of the core's scope (§1) — shown here
//! only so the kernel has a runnable front door; a real deployment's HTTP
//! layer, auth, and metrics exporter are someone else's concern.

mod config;
mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use config::ApiConfig;
use fenceq_postgres::PgJobStore;
use routes::{AppState, Metrics};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "fenceq_api_demo=info,tower_http=info".to_string()))
        .init();

    let config = ApiConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    let store = Arc::new(PgJobStore::new(pool).with_default_max_attempts(config.max_attempts_default));
    store.run_migrations().await?;

    let state = Arc::new(AppState {
        store,
        metrics: Metrics::default(),
    });

    let app = Router::new()
        .route("/jobs", post(routes::submit_job))
        .route("/jobs/{id}", get(routes::get_job))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("fenceq demo api listening on {}", listener.local_addr().unwrap_or(config.bind_addr));
    axum::serve(listener, app).await?;

    Ok(())
}
