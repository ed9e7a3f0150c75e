//! Scrape-page browsing and bulk manual processing. Preview never mutates;
//! apply reports per-page outcomes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use hindsite_common::PageStatus;
use hindsite_jobs::{EnqueueOptions, QueueName};
use hindsite_pipeline::{ExtractBatchPayload, EXTRACT_BATCH_JOB};
use hindsite_store::{PageCursor, ScrapePageQuery, ScrapePageRow, StoreError};

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub filter_category: Option<String>,
    #[serde(default)]
    pub is_manually_overridden: Option<bool>,
    #[serde(default)]
    pub priority_min: Option<i32>,
    #[serde(default)]
    pub priority_max: Option<i32>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub has_errors: Option<bool>,
    #[serde(default)]
    pub date_from: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub date_to: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub show_only_processable: Option<bool>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl ListParams {
    /// CSV list params ("status=pending,failed") into the query shape.
    fn to_query(&self) -> ScrapePageQuery {
        let csv = |raw: &Option<String>| -> Vec<String> {
            raw.as_deref()
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        ScrapePageQuery {
            statuses: csv(&self.status),
            filter_categories: csv(&self.filter_category),
            is_manually_overridden: self.is_manually_overridden,
            priority_min: self.priority_min,
            priority_max: self.priority_max,
            search: self.search.clone(),
            session_id: self.session_id,
            has_errors: self.has_errors,
            date_from: self.date_from,
            date_to: self.date_to,
            show_only_processable: self.show_only_processable.unwrap_or(false),
            cursor: self.cursor.as_deref().and_then(PageCursor::decode),
            limit: self.limit.unwrap_or(100),
        }
    }
}

pub async fn list_scrape_pages(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> axum::response::Response {
    let query = params.to_query();
    match state.store.list_scrape_pages(project_id, &query).await {
        Ok(rows) => {
            let next_cursor = rows.last().map(|row| {
                PageCursor {
                    created_at: row.created_at,
                    id: row.id,
                }
                .encode()
            });
            Json(serde_json::json!({
                "scrape_pages": rows,
                "next_cursor": next_cursor,
            }))
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Scrape page listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Bulk manual processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    MarkForProcessing,
    ApproveAll,
    SkipAll,
    Retry,
    ResetStatus,
    UpdatePriority,
    Delete,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkBody {
    pub action: BulkAction,
    #[serde(default)]
    pub reason: Option<String>,
    /// Required for update_priority.
    #[serde(default)]
    pub priority: Option<u8>,
    /// Explicit page ids; when empty, `filters` selects the set.
    #[serde(default)]
    pub scrape_page_ids: Vec<Uuid>,
    #[serde(default)]
    pub filters: Option<BulkFilters>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkFilters {
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub filter_category: Vec<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub priority_min: Option<i32>,
    #[serde(default)]
    pub priority_max: Option<i32>,
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
struct BulkOutcome {
    id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn select_pages(
    state: &AppState,
    project_id: Uuid,
    body: &BulkBody,
) -> Result<Vec<ScrapePageRow>, StoreError> {
    if !body.scrape_page_ids.is_empty() {
        let mut rows = Vec::new();
        for id in &body.scrape_page_ids {
            match state.store.get_scrape_page(*id).await {
                Ok(row) => rows.push(row),
                Err(StoreError::NotFound(..)) => {}
                Err(e) => return Err(e),
            }
        }
        return Ok(rows);
    }

    let filters = body.filters.clone().unwrap_or_default();
    let query = ScrapePageQuery {
        statuses: filters.status.clone(),
        filter_categories: filters.filter_category.clone(),
        session_id: filters.session_id,
        priority_min: filters.priority_min,
        priority_max: filters.priority_max,
        search: filters.search.clone(),
        limit: 500,
        ..Default::default()
    };
    state.store.list_scrape_pages(project_id, &query).await
}

/// What a bulk action would do to one page, without doing it.
fn preview_action(row: &ScrapePageRow, action: BulkAction) -> Result<&'static str, String> {
    let status: PageStatus = row
        .status
        .parse()
        .map_err(|_| format!("unparseable status {}", row.status))?;
    match action {
        BulkAction::MarkForProcessing | BulkAction::ApproveAll => {
            hindsite_store::check_transition(status, PageStatus::ManuallyApproved)
                .map_err(|e| e.to_string())?;
            Ok("manually_approved")
        }
        BulkAction::SkipAll => {
            hindsite_store::check_transition(status, PageStatus::ManuallySkipped)
                .map_err(|e| e.to_string())?;
            Ok("manually_skipped")
        }
        BulkAction::Retry | BulkAction::ResetStatus => {
            hindsite_store::check_transition(status, PageStatus::Pending)
                .map_err(|e| e.to_string())?;
            Ok("pending")
        }
        BulkAction::UpdatePriority => Ok("unchanged"),
        BulkAction::Delete => Ok("deleted"),
    }
}

pub async fn bulk_preview(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Json(body): Json<BulkBody>,
) -> axum::response::Response {
    let rows = match select_pages(&state, project_id, &body).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "Bulk preview selection failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response();
        }
    };

    let mut would_succeed = Vec::new();
    let mut would_fail = Vec::new();
    for row in &rows {
        match preview_action(row, body.action) {
            Ok(new_status) => would_succeed.push(BulkOutcome {
                id: row.id,
                new_status: Some(new_status.to_string()),
                reason: None,
            }),
            Err(reason) => would_fail.push(BulkOutcome {
                id: row.id,
                new_status: None,
                reason: Some(reason),
            }),
        }
    }

    Json(serde_json::json!({
        "action": body.action,
        "total": rows.len(),
        "would_succeed": would_succeed,
        "would_fail": would_fail,
    }))
    .into_response()
}

pub async fn bulk_apply(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Json(body): Json<BulkBody>,
) -> axum::response::Response {
    if body.action == BulkAction::UpdatePriority && body.priority.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "errors": [{"field": "priority", "message": "update_priority requires a priority", "code": "required"}]
            })),
        )
            .into_response();
    }

    let rows = match select_pages(&state, project_id, &body).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "Bulk apply selection failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response();
        }
    };

    let reason = body.reason.clone().unwrap_or_else(|| "bulk action".to_string());
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    let mut to_process: Vec<Uuid> = Vec::new();

    for row in &rows {
        let result = apply_action(&state, project_id, row, &body, &reason).await;
        match result {
            Ok(new_status) => {
                if body.action == BulkAction::MarkForProcessing {
                    to_process.push(row.id);
                }
                succeeded.push(BulkOutcome {
                    id: row.id,
                    new_status: Some(new_status.to_string()),
                    reason: None,
                });
            }
            Err(reason) => failed.push(BulkOutcome {
                id: row.id,
                new_status: None,
                reason: Some(reason),
            }),
        }
    }

    // Approved-for-processing pages go straight onto the scraping queue.
    if !to_process.is_empty() {
        let session_id = rows.iter().find_map(|r| r.session_id);
        if let Some(session_id) = session_id {
            let payload = ExtractBatchPayload {
                project_id,
                session_id,
                scrape_page_ids: to_process,
            };
            if let Err(e) = state
                .jobs
                .enqueue(
                    QueueName::Scraping,
                    EXTRACT_BATCH_JOB,
                    serde_json::to_value(&payload).expect("payload serializes"),
                    EnqueueOptions {
                        session_id: Some(session_id),
                        ..Default::default()
                    },
                )
                .await
            {
                warn!(error = %e, "Failed to enqueue manual processing batch");
            }
        }
    }

    Json(serde_json::json!({
        "action": body.action,
        "succeeded": succeeded,
        "failed": failed,
    }))
    .into_response()
}

async fn apply_action(
    state: &AppState,
    project_id: Uuid,
    row: &ScrapePageRow,
    body: &BulkBody,
    reason: &str,
) -> Result<&'static str, String> {
    let map_err = |e: StoreError| e.to_string();
    match body.action {
        BulkAction::MarkForProcessing => {
            state
                .facade
                .mark_manual_override(
                    row.id,
                    project_id,
                    PageStatus::ManuallyApproved,
                    "api",
                    reason,
                )
                .await
                .map_err(map_err)?;
            state
                .facade
                .reset_to_pending(row.id, project_id)
                .await
                .map_err(map_err)?;
            Ok("pending")
        }
        BulkAction::ApproveAll => {
            state
                .facade
                .mark_manual_override(
                    row.id,
                    project_id,
                    PageStatus::ManuallyApproved,
                    "api",
                    reason,
                )
                .await
                .map_err(map_err)?;
            Ok("manually_approved")
        }
        BulkAction::SkipAll => {
            state
                .facade
                .mark_manual_override(
                    row.id,
                    project_id,
                    PageStatus::ManuallySkipped,
                    "api",
                    reason,
                )
                .await
                .map_err(map_err)?;
            Ok("manually_skipped")
        }
        BulkAction::Retry | BulkAction::ResetStatus => {
            state
                .facade
                .set_status(row.id, project_id, PageStatus::Pending, None)
                .await
                .map_err(map_err)?;
            Ok("pending")
        }
        BulkAction::UpdatePriority => {
            let priority = body.priority.expect("validated above");
            state
                .facade
                .update_priority(row.id, project_id, priority)
                .await
                .map_err(map_err)?;
            Ok("unchanged")
        }
        BulkAction::Delete => {
            state
                .facade
                .delete_scrape_page(row.id, project_id)
                .await
                .map_err(map_err)?;
            Ok("deleted")
        }
    }
}
