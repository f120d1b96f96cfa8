//! Job endpoints: kickoff, inspect, list, feedback, delete.
//!
//! The `require_approval` flag rides in with the pipeline inputs but is an
//! orchestration switch, not pipeline data, so it is lifted out before the
//! inputs are stored or handed to the pipeline.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::core::executor::{ExecuteRequest, FeedbackError};
use crate::core::job::{JobInputs, JobStatus};
use crate::interfaces::web::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Deserialize)]
pub(crate) struct KickoffRequest {
    // `crew` accepted as a legacy spelling of `pipeline`
    #[serde(alias = "crew")]
    pipeline: Option<String>,
    #[serde(default)]
    inputs: JobInputs,
    webhook_url: Option<String>,
    #[serde(default)]
    wait: bool,
}

#[derive(Deserialize)]
pub(crate) struct FeedbackRequest {
    feedback: Option<String>,
    #[serde(default)]
    approved: bool,
}

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    limit: Option<usize>,
    status: Option<String>,
}

fn error_body(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "success": false, "error": message.into() }))
}

/// HTTP status for an inline (`wait=true`) run: configuration problems are
/// the caller's to fix, everything else that failed is on the server.
fn wait_status(job: &crate::core::job::Job) -> StatusCode {
    if job.status != JobStatus::Error {
        return StatusCode::OK;
    }
    match job.error_type.as_deref() {
        Some("ConfigurationError") => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) async fn kickoff_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<KickoffRequest>,
) -> (StatusCode, Json<Value>) {
    let Some(pipeline) = payload.pipeline.filter(|p| !p.trim().is_empty()) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            error_body("missing required field: pipeline"),
        );
    };
    if state.registry.get(&pipeline).is_none() {
        return (
            StatusCode::NOT_FOUND,
            error_body(format!("unknown pipeline: {}", pipeline)),
        );
    }

    let mut inputs = payload.inputs;
    let require_approval = inputs
        .remove("require_approval")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let job = state
        .executor
        .store()
        .create(&pipeline, inputs.clone(), payload.webhook_url);
    info!("job {} created for pipeline {}", job.id, pipeline);

    let request = ExecuteRequest {
        job_id: job.id.clone(),
        pipeline,
        inputs,
        require_approval,
    };

    if payload.wait {
        match state.executor.run_blocking(request).await {
            Some(done) => (
                wait_status(&done),
                Json(json!({
                    "success": done.status != JobStatus::Error,
                    "job_id": done.id,
                    "status": done.status,
                    "result": done.result,
                    "error": done.error,
                    "error_type": done.error_type,
                })),
            ),
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("job vanished during execution"),
            ),
        }
    } else {
        match state.executor.enqueue(request).await {
            Ok(()) => (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "job_id": job.id,
                    "status": JobStatus::Queued,
                })),
            ),
            Err(e) => (StatusCode::SERVICE_UNAVAILABLE, error_body(e.to_string())),
        }
    }
}

pub(crate) async fn get_job_endpoint(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.executor.store().get(&job_id) {
        Some(job) => (
            StatusCode::OK,
            Json(serde_json::to_value(&job).unwrap_or_default()),
        ),
        None => (StatusCode::NOT_FOUND, error_body("Job not found")),
    }
}

pub(crate) async fn feedback_endpoint(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(payload): Json<FeedbackRequest>,
) -> (StatusCode, Json<Value>) {
    match state
        .executor
        .submit_feedback(&job_id, payload.feedback, payload.approved)
        .await
    {
        Ok(job) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "job_id": job.id,
                "status": job.status,
                "human_approved": job.human_approved,
            })),
        ),
        Err(e @ FeedbackError::NotFound) => (StatusCode::NOT_FOUND, error_body(e.to_string())),
        Err(e @ FeedbackError::MissingRetryContext) => {
            (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string()))
        }
        Err(e) => (StatusCode::BAD_REQUEST, error_body(e.to_string())),
    }
}

pub(crate) async fn list_jobs_endpoint(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> (StatusCode, Json<Value>) {
    let status = match query.status.as_deref() {
        Some(raw) => match JobStatus::from_status(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    error_body(format!("unknown status: {}", raw)),
                );
            }
        },
        None => None,
    };

    // limit 0 is allowed: it returns the count without a page
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let (jobs, total) = state.executor.store().list(status, limit);
    let shown = jobs.len();
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "jobs": jobs,
            "shown": shown,
            "total_jobs": total,
        })),
    )
}

pub(crate) async fn delete_job_endpoint(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    if state.executor.store().delete(&job_id) {
        info!("job {} deleted", job_id);
        (
            StatusCode::OK,
            Json(json!({ "success": true, "job_id": job_id })),
        )
    } else {
        (StatusCode::NOT_FOUND, error_body("Job not found"))
    }
}
