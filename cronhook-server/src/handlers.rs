//! Job HTTP route handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use cronhook::job::{HttpMethod, Job, JobId, JobStatus};
use cronhook::ledger::RunRecord;
use cronhook::service::{JobService, JobSpec};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JobService>,
}

/// Minimal acknowledgement returned by mutating endpoints.
#[derive(Debug, Serialize)]
pub struct JobResult {
    pub id: JobId,
    pub status: &'static str,
}

/// Full job definition as returned by `GET /jobs/{id}`.
#[derive(Debug, Serialize)]
pub struct JobInfo {
    pub id: JobId,
    pub cron: String,
    pub url: String,
    pub method: HttpMethod,
    pub headers: Option<HashMap<String, String>>,
    pub body: Option<String>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}

impl From<Job> for JobInfo {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            cron: job.cron,
            url: job.action.url,
            method: job.action.method,
            headers: job.action.headers,
            body: job.action.body,
            // Mirrors the job status: a paused job has no next run.
            next_run_time: match job.status {
                JobStatus::Scheduled => Some(job.next_fire_at),
                JobStatus::Paused => None,
            },
            status: job.status.as_str(),
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

fn default_limit() -> u64 {
    20
}

#[derive(Debug, Serialize)]
pub struct RunsResponse {
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub items: Vec<RunRecord>,
}

/// GET /health. Liveness only, no store readiness implied.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /jobs
pub async fn create_job(
    State(state): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> Result<(StatusCode, Json<JobResult>), ApiError> {
    let job = state.service.create_job(spec).await?;
    Ok((
        StatusCode::CREATED,
        Json(JobResult {
            id: job.id,
            status: "scheduled",
        }),
    ))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, ApiError> {
    let job = state.service.get_job(&id.into()).await?;
    Ok(Json(job.into()))
}

/// DELETE /jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResult>, ApiError> {
    let id: JobId = id.into();
    state.service.delete_job(&id).await?;
    Ok(Json(JobResult {
        id,
        status: "deleted",
    }))
}

/// POST /jobs/{id}/pause
pub async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResult>, ApiError> {
    let id: JobId = id.into();
    state.service.pause_job(&id).await?;
    Ok(Json(JobResult {
        id,
        status: "paused",
    }))
}

/// POST /jobs/{id}/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResult>, ApiError> {
    let id: JobId = id.into();
    state.service.resume_job(&id).await?;
    Ok(Json(JobResult {
        id,
        status: "scheduled",
    }))
}

/// GET /jobs/{id}/runs?limit&offset
pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<RunsResponse>, ApiError> {
    let page = state
        .service
        .runs(&id.into(), query.limit, query.offset)
        .await?;
    Ok(Json(RunsResponse {
        total: page.total,
        limit: query.limit,
        offset: query.offset,
        items: page.items,
    }))
}
