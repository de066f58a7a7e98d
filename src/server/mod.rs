//! Admin HTTP surface: health, Prometheus metrics and job control.

pub mod metrics;

use crate::background_jobs::{JobError, SchedulerHandle};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AdminState {
    pub scheduler: SchedulerHandle,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// =============================================================================
// Routes
// =============================================================================

/// GET /health
async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// GET /jobs - List all registered jobs
async fn list_jobs(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.scheduler.list_jobs().await)
}

/// GET /jobs/{job_id}
async fn get_job(State(state): State<AdminState>, Path(job_id): Path<String>) -> impl IntoResponse {
    match state.scheduler.get_job(&job_id).await {
        Some(job) => Json(job).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("Job {} not found", job_id)),
    }
}

/// GET /jobs/{job_id}/history?limit=N
async fn get_job_history(
    State(state): State<AdminState>,
    Path(job_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    if !state.scheduler.job_exists(&job_id).await {
        return error_response(StatusCode::NOT_FOUND, format!("Job {} not found", job_id));
    }
    let limit = query.limit.unwrap_or(20).min(100);
    Json(state.scheduler.get_job_history(&job_id, limit)).into_response()
}

/// POST /jobs/{job_id}/trigger - Run a job now
async fn trigger_job(
    State(state): State<AdminState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.scheduler.trigger_job(&job_id).await {
        Ok(()) => {
            info!("Manually triggered job {}", job_id);
            StatusCode::ACCEPTED.into_response()
        }
        Err(JobError::NotFound) => {
            error_response(StatusCode::NOT_FOUND, format!("Job {} not found", job_id))
        }
        Err(JobError::AlreadyRunning) => error_response(
            StatusCode::CONFLICT,
            format!("Job {} is already running", job_id),
        ),
        Err(e) => {
            warn!("Failed to trigger job {}: {}", job_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub fn make_app(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/history", get(get_job_history))
        .route("/jobs/{job_id}/trigger", post(trigger_job))
        .with_state(state)
}

/// Serves the admin app until `shutdown_token` is cancelled.
pub async fn run_admin_server(
    port: u16,
    scheduler: SchedulerHandle,
    shutdown_token: CancellationToken,
) -> anyhow::Result<()> {
    let app = make_app(AdminState { scheduler });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Admin server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_token.cancelled_owned())
        .await?;
    Ok(())
}
