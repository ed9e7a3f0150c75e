//! Project endpoints: creation, archive-policy updates, scrape kickoff,
//! session and job browsing.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{error, info};
use uuid::Uuid;

use hindsite_jobs::{EnqueueOptions, JobError, QueueName};
use hindsite_pipeline::{ScrapeProjectPayload, SCRAPE_PROJECT_JOB};
use hindsite_store::StoreError;

use crate::state::AppState;
use crate::validation::{
    parse_consistency, resolve_policy, validate_target, CreateProjectBody, FieldError,
    PatchProjectBody,
};

fn validation_failure(errors: Vec<FieldError>) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "errors": errors })),
    )
        .into_response()
}

fn internal_error(e: impl std::fmt::Display) -> axum::response::Response {
    error!(error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
        .into_response()
}

fn not_found(what: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("{what} not found") })),
    )
        .into_response()
}

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateProjectBody>,
) -> axum::response::Response {
    let mut errors = Vec::new();

    if body.name.trim().is_empty() {
        errors.push(FieldError::new("name", "name is required", "required"));
    }
    let policy = resolve_policy(
        body.archive_source.as_deref(),
        body.fallback_enabled,
        body.archive_config.as_ref(),
        &mut errors,
    );
    let consistency = parse_consistency(body.consistency_level.as_deref(), &mut errors);
    for (i, target) in body.targets.iter().enumerate() {
        validate_target(target, i, &mut errors);
    }
    if !errors.is_empty() {
        return validation_failure(errors);
    }

    let project = match state
        .store
        .create_project(
            body.name.trim(),
            body.description.as_deref().unwrap_or(""),
            &policy,
            &serde_json::json!({}),
            consistency,
        )
        .await
    {
        Ok(project) => project,
        Err(e) => return internal_error(e),
    };

    let mut targets = Vec::new();
    for target in &body.targets {
        match state
            .store
            .add_target(
                project.id,
                &target.domain,
                target.match_type.as_deref().unwrap_or("host_exact"),
                target.url_path.as_deref(),
                target.from_date,
                target.to_date,
                target.include_attachments.unwrap_or(false),
            )
            .await
        {
            Ok(row) => targets.push(row),
            Err(e) => return internal_error(e),
        }
    }

    info!(project_id = %project.id, targets = targets.len(), "Project created");
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "project": project, "targets": targets })),
    )
        .into_response()
}

pub async fn patch_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Json(body): Json<PatchProjectBody>,
) -> axum::response::Response {
    let existing = match state.store.get_project(project_id).await {
        Ok(project) => project,
        Err(StoreError::NotFound(..)) => return not_found("project"),
        Err(e) => return internal_error(e),
    };
    let current = hindsite_store::Store::parse_policy(&existing);

    // Revalidation is identical to creation; unspecified fields keep their
    // current values.
    let mut errors = Vec::new();
    let source_str = body
        .archive_source
        .clone()
        .unwrap_or_else(|| current.archive_source.to_string());
    let mut policy = resolve_policy(
        Some(&source_str),
        Some(body.fallback_enabled.unwrap_or(current.fallback_enabled)),
        body.archive_config.as_ref(),
        &mut errors,
    );
    // Per-source settings not mentioned in this patch stay as they were.
    if body.archive_config.is_none() {
        policy.fallback_strategy = current.fallback_strategy;
        policy.fallback_delay_seconds = current.fallback_delay_seconds;
        policy.exponential_backoff = current.exponential_backoff;
        policy.max_fallback_delay = current.max_fallback_delay;
        policy.wayback_machine = current.wayback_machine.clone();
        policy.common_crawl = current.common_crawl.clone();
        if let Err(message) = policy.validate() {
            errors.push(FieldError::new("archive_config", message, "out_of_range"));
        }
    }
    if !errors.is_empty() {
        return validation_failure(errors);
    }

    match state.store.update_project_policy(project_id, &policy).await {
        Ok(project) => Json(serde_json::json!({ "project": project })).into_response(),
        Err(StoreError::NotFound(..)) => not_found("project"),
        Err(e) => internal_error(e),
    }
}

/// Create a session and enqueue the root scrape job.
pub async fn start_scrape(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> axum::response::Response {
    let project = match state.store.get_project(project_id).await {
        Ok(project) => project,
        Err(StoreError::NotFound(..)) => return not_found("project"),
        Err(e) => return internal_error(e),
    };

    let targets = match state.store.targets_for_project(project.id).await {
        Ok(targets) => targets,
        Err(e) => return internal_error(e),
    };
    if targets.is_empty() {
        return validation_failure(vec![FieldError::new(
            "targets",
            "project has no targets to scrape",
            "no_targets",
        )]);
    }

    let from_date = targets.iter().map(|t| t.from_date).min().expect("non-empty");
    let to_date = targets.iter().map(|t| t.to_date).max().expect("non-empty");

    let session = match state.facade.create_session(project.id, from_date, to_date).await {
        Ok(session) => session,
        Err(e) => return internal_error(e),
    };

    let payload = ScrapeProjectPayload {
        project_id: project.id,
        session_id: session.id,
    };
    let job_id = match state
        .jobs
        .enqueue(
            QueueName::Scraping,
            SCRAPE_PROJECT_JOB,
            serde_json::to_value(&payload).expect("payload serializes"),
            EnqueueOptions {
                session_id: Some(session.id),
                ..Default::default()
            },
        )
        .await
    {
        Ok(job_id) => job_id,
        Err(JobError::QueueFull { .. }) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": "scraping queue is at capacity" })),
            )
                .into_response()
        }
        Err(e) => return internal_error(e),
    };

    info!(project_id = %project.id, session_id = %session.id, job_id = %job_id, "Scrape started");
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "session_id": session.id, "job_id": job_id })),
    )
        .into_response()
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> axum::response::Response {
    match state.store.sessions_for_project(project_id).await {
        Ok(sessions) => Json(serde_json::json!({ "sessions": sessions })).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> axum::response::Response {
    match state.jobs.get(job_id).await {
        Ok(job) => Json(serde_json::json!({
            "id": job.id,
            "queue": job.queue,
            "job_type": job.job_type,
            "state": job.state,
            "attempts": job.attempts,
            "progress": {
                "current": job.progress_current,
                "total": job.progress_total,
                "message": job.progress_message,
            },
            "last_error": job.last_error,
            "created_at": job.created_at,
            "updated_at": job.updated_at,
        }))
        .into_response(),
        Err(JobError::NotFound(_)) => not_found("job"),
        Err(e) => internal_error(e),
    }
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> axum::response::Response {
    match state.jobs.request_cancel(job_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "cancellation requested" })),
        )
            .into_response(),
        Err(JobError::NotFound(_)) => not_found("job"),
        Err(e) => internal_error(e),
    }
}
