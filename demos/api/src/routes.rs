use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fenceq_core::{JobId, JobStore, Payload, SubmitError, SubmitRequest};
use fenceq_postgres::PgJobStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-scoped counters behind `GET /metrics` (§6). A production
/// deployment would wire these through `prometheus`/`metrics`; kept as
/// plain atomics here since the exporter plumbing itself is out of scope
/// (§1 "out of scope ... the metrics exporter").
#[derive(Default)]
pub struct Metrics {
    pub submitted: AtomicU64,
    pub idempotency_conflicts: AtomicU64,
}

pub struct AppState {
    pub store: Arc<PgJobStore>,
    pub metrics: Metrics,
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobCreated {
    pub id: Uuid,
    pub state: &'static str,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: Uuid,
    pub state: &'static str,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitJobBody>,
) -> Response {
    if body.job_type.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "type must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    let mut request = SubmitRequest::new(body.job_type, Payload(body.payload));
    if let Some(key) = body.idempotency_key {
        request = request.with_idempotency_key(key);
    }

    match state.store.submit(request).await {
        Ok(job_id) => {
            state.metrics.submitted.fetch_add(1, Ordering::Relaxed);
            (
                StatusCode::CREATED,
                Json(JobCreated {
                    id: job_id.0,
                    state: "queued",
                }),
            )
                .into_response()
        }
        Err(SubmitError::IdempotencyConflict) => {
            state.metrics.idempotency_conflicts.fetch_add(1, Ordering::Relaxed);
            (
                StatusCode::CONFLICT,
                Json(ErrorBody {
                    error: "idempotency key already used with a different payload".to_string(),
                }),
            )
                .into_response()
        }
        Err(SubmitError::Store(e)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody { error: e.to_string() }),
        )
            .into_response(),
    }
}

pub async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.store.get(JobId(id)).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(JobView {
                id: record.id.0,
                state: record.state.as_str(),
                attempts: record.attempts,
                max_attempts: record.max_attempts,
                last_error: record.last_error,
            }),
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody { error: e.to_string() }),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    format!(
        "fenceq_jobs_submitted_total {}\nfenceq_idempotency_conflicts_total {}\n",
        state.metrics.submitted.load(Ordering::Relaxed),
        state.metrics.idempotency_conflicts.load(Ordering::Relaxed),
    )
}
