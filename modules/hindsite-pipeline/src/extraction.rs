//! The extract_batch handler: fetch archived bytes, run the tiered
//! extractor, materialize pages, and close the session when the last batch
//! drains.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use hindsite_common::{CaptureRecord, PageStatus, SessionCounters, SessionState};
use hindsite_extract::ExtractError;
use hindsite_jobs::{JobContext, JobFailure, JobHandler};
use hindsite_sources::SourceError;
use hindsite_store::ScrapePageRow;

use crate::deps::PipelineDeps;

pub const EXTRACT_BATCH_JOB: &str = "extract_batch";

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractBatchPayload {
    pub project_id: Uuid,
    pub session_id: Uuid,
    /// Already in deterministic (original_url, capture_timestamp) order.
    pub scrape_page_ids: Vec<Uuid>,
}

pub struct ExtractBatchHandler {
    deps: Arc<PipelineDeps>,
}

impl ExtractBatchHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    /// Process one capture end to end. Returns whether extraction succeeded.
    async fn process_capture(
        &self,
        ctx: &JobContext,
        project_id: Uuid,
        row: &ScrapePageRow,
        policy: &hindsite_common::ArchivePolicy,
    ) -> Result<bool, JobFailure> {
        let deps = &self.deps;

        deps.facade
            .set_status(row.id, project_id, PageStatus::InProgress, None)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;

        let capture = CaptureRecord {
            timestamp: row.capture_timestamp.clone(),
            original_url: row.original_url.clone(),
            mime_type: row.mime_type.clone(),
            status_code: row.status_code.clone(),
            digest: row.digest.clone(),
            length: row.length.max(0) as u64,
        };

        let primary = deps
            .router
            .resolve_order(policy)
            .first()
            .map(|s| s.source())
            .unwrap_or(hindsite_common::ArchiveSource::WaybackMachine);

        let fetched = match deps
            .fetcher
            .fetch(policy, &capture, primary, &ctx.cancel)
            .await
        {
            Ok(fetched) => fetched,
            Err(SourceError::Cancelled) => return Err(JobFailure::Cancelled),
            Err(e) => {
                warn!(url = %row.original_url, error = %e, "Capture fetch failed");
                deps.facade
                    .set_status(row.id, project_id, PageStatus::Failed, Some(&e.to_string()))
                    .await
                    .map_err(|e| JobFailure::Retriable(e.into()))?;
                return Ok(false);
            }
        };

        // Bounded extraction concurrency across the whole process.
        let _permit = deps
            .extract_limit
            .acquire()
            .await
            .map_err(|_| JobFailure::Permanent(anyhow::anyhow!("extract semaphore closed")))?;

        let outcome = match deps
            .extractor
            .extract(&fetched.bytes, &row.original_url)
            .await
        {
            Ok(outcome) => outcome,
            Err(ExtractError::ExtractionFailed) => {
                deps.facade
                    .set_status(
                        row.id,
                        project_id,
                        PageStatus::Failed,
                        Some("all extraction strategies failed"),
                    )
                    .await
                    .map_err(|e| JobFailure::Retriable(e.into()))?;
                return Ok(false);
            }
            Err(e) => {
                deps.facade
                    .set_status(row.id, project_id, PageStatus::Failed, Some(&e.to_string()))
                    .await
                    .map_err(|e| JobFailure::Retriable(e.into()))?;
                return Ok(false);
            }
        };

        let extraction = {
            let mut recent = deps.recent_hashes.lock().await;
            hindsite_extract::finalize(
                &row.original_url,
                &row.capture_timestamp,
                outcome,
                &mut recent,
            )
        };

        let (page_id, _) = deps
            .facade
            .materialize_page(row.target_id, &extraction)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;
        deps.facade
            .link_scrape_page_to_page(row.id, page_id)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;

        let page = deps
            .store
            .get_page(page_id)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;
        deps.facade
            .emit_index_upsert(&page)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;

        deps.facade
            .set_status(row.id, project_id, PageStatus::Completed, None)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;
        Ok(true)
    }
}

#[async_trait]
impl JobHandler for ExtractBatchHandler {
    fn job_type(&self) -> &'static str {
        EXTRACT_BATCH_JOB
    }

    async fn run(&self, ctx: JobContext) -> Result<(), JobFailure> {
        let payload: ExtractBatchPayload = serde_json::from_value(ctx.payload.clone())
            .map_err(|e| JobFailure::Permanent(anyhow::anyhow!("bad payload: {e}")))?;
        let deps = &self.deps;

        let project = deps
            .store
            .get_project(payload.project_id)
            .await
            .map_err(|e| JobFailure::Permanent(e.into()))?;
        let policy = hindsite_store::Store::parse_policy(&project);

        let mut counters = SessionCounters::default();
        let total = payload.scrape_page_ids.len();

        for (i, scrape_page_id) in payload.scrape_page_ids.iter().enumerate() {
            ctx.checkpoint()?;

            let row = match deps.store.get_scrape_page(*scrape_page_id).await {
                Ok(row) => row,
                Err(e) => {
                    warn!(scrape_page_id = %scrape_page_id, error = %e, "Scrape page vanished");
                    continue;
                }
            };

            // First attempt takes pending rows; retries also pick up rows
            // that failed mid-batch. Everything else is done or frozen.
            let status: PageStatus = match row.status.parse() {
                Ok(status) => status,
                Err(_) => continue,
            };
            let eligible = status == PageStatus::Pending
                || (status == PageStatus::Failed && ctx.attempt > 1);
            if !eligible {
                continue;
            }

            match self
                .process_capture(&ctx, payload.project_id, &row, &policy)
                .await?
            {
                true => counters.extracted_ok += 1,
                false => counters.extracted_failed += 1,
            }

            ctx.progress(i as i64 + 1, Some(total as i64), None).await;
        }

        deps.facade
            .increment_session_counters(payload.session_id, &counters)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;

        // Last batch out closes the session.
        let remaining: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM scrape_pages
            WHERE session_id = $1 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(payload.session_id)
        .fetch_one(deps.store.pool())
        .await
        .map_err(|e| JobFailure::Retriable(e.into()))?;

        if remaining == 0 {
            let session = deps
                .store
                .get_session(payload.session_id)
                .await
                .map_err(|e| JobFailure::Retriable(e.into()))?;
            let session_counters: SessionCounters =
                serde_json::from_value(session.counters).unwrap_or_default();
            // A run fails only when nothing at all was ingested.
            let state = if session_counters.extracted_ok == 0 && session_counters.discovered == 0 {
                SessionState::Failed
            } else {
                SessionState::Completed
            };
            deps.facade
                .finish_session(payload.session_id, state)
                .await
                .map_err(|e| JobFailure::Retriable(e.into()))?;
            info!(session_id = %payload.session_id, state = %state, "Session finished");
        }

        Ok(())
    }
}
