use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use serde::Deserialize;

use super::super::AppState;
use super::{ApiResult, DEFAULT_HISTORY_LIMIT, LimitQuery, body, query};
use crate::core::daemon::CreateJob;
use crate::core::error::DaemonError;
use crate::core::store::JobStatus;

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    status: Option<String>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    params: Result<Query<JobListQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let status = match params.status.as_deref() {
        Some(s) => Some(s.parse::<JobStatus>().map_err(DaemonError::Validation)?),
        None => None,
    };
    let jobs = state.service.list_jobs(status).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "jobs": jobs
    })))
}

pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<CreateJob>, JsonRejection>,
) -> ApiResult {
    let (job, warnings) = state.service.create_job(body(payload)?).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "job": job,
        "warnings": warnings
    })))
}

pub async fn job_status(Path(name): Path<String>, State(state): State<AppState>) -> ApiResult {
    let report = state.service.job_status(&name).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "job": report.job,
        "latest_execution": report.latest_execution,
        "retry_chain": report.retry_chain
    })))
}

pub async fn delete_job(Path(name): Path<String>, State(state): State<AppState>) -> ApiResult {
    state.service.delete_job(&name).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "deleted": name
    })))
}

async fn transition(state: AppState, name: String, target: JobStatus) -> ApiResult {
    let job = state.service.set_job_status(&name, target).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "job": job
    })))
}

pub async fn pause_job(Path(name): Path<String>, State(state): State<AppState>) -> ApiResult {
    transition(state, name, JobStatus::Paused).await
}

pub async fn resume_job(Path(name): Path<String>, State(state): State<AppState>) -> ApiResult {
    transition(state, name, JobStatus::Active).await
}

pub async fn disable_job(Path(name): Path<String>, State(state): State<AppState>) -> ApiResult {
    transition(state, name, JobStatus::Disabled).await
}

pub async fn archive_job(Path(name): Path<String>, State(state): State<AppState>) -> ApiResult {
    transition(state, name, JobStatus::Archived).await
}

pub async fn run_job(Path(name): Path<String>, State(state): State<AppState>) -> ApiResult {
    let execution = state.service.run_job(&name).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "execution": execution
    })))
}

pub async fn job_executions(
    Path(name): Path<String>,
    State(state): State<AppState>,
    params: Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let executions = state
        .service
        .job_executions(&name, params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "executions": executions
    })))
}
