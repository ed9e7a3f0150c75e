//! The scrape_project handler: list captures per target, classify each one,
//! persist the verdicts, and fan out extraction batches for what survived.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use hindsite_common::{DateWindow, PageStatus, SessionCounters, SessionState};
use hindsite_filter::{FilterConfig, FilterVerdict};
use hindsite_jobs::{EnqueueOptions, JobContext, JobFailure, JobHandler, QueueName};
use hindsite_sources::RouterError;

use crate::deps::PipelineDeps;
use crate::extraction::{ExtractBatchPayload, EXTRACT_BATCH_JOB};

pub const SCRAPE_PROJECT_JOB: &str = "scrape_project";

#[derive(Debug, Serialize, Deserialize)]
pub struct ScrapeProjectPayload {
    pub project_id: Uuid,
    pub session_id: Uuid,
}

pub struct ScrapeProjectHandler {
    deps: Arc<PipelineDeps>,
}

impl ScrapeProjectHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for ScrapeProjectHandler {
    fn job_type(&self) -> &'static str {
        SCRAPE_PROJECT_JOB
    }

    async fn run(&self, ctx: JobContext) -> Result<(), JobFailure> {
        let payload: ScrapeProjectPayload = serde_json::from_value(ctx.payload.clone())
            .map_err(|e| JobFailure::Permanent(anyhow::anyhow!("bad payload: {e}")))?;
        let deps = &self.deps;

        let project = deps
            .store
            .get_project(payload.project_id)
            .await
            .map_err(|e| JobFailure::Permanent(e.into()))?;
        let policy = hindsite_store::Store::parse_policy(&project);
        let filter_config: FilterConfig = parse_filter_config(&project.filter_config);
        let targets = deps
            .store
            .targets_for_project(project.id)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;

        deps.facade
            .set_session_state(payload.session_id, SessionState::Indexing)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;

        info!(
            project_id = %project.id,
            session_id = %payload.session_id,
            targets = targets.len(),
            "Scrape run starting"
        );

        let mut total_discovered = 0u64;
        let mut targets_failed = 0usize;
        let mut processed_targets = 0i64;

        for target_row in &targets {
            ctx.checkpoint()?;
            let target = target_row
                .to_target()
                .map_err(JobFailure::Permanent)?;
            let window = DateWindow::new(target.from_date, target.to_date)
                .map_err(|e| JobFailure::Permanent(anyhow::anyhow!(e)))?;

            let listing = match deps
                .router
                .list_captures(&policy, &target, window, &ctx.cancel)
                .await
            {
                Ok(listing) => listing,
                Err(RouterError::Cancelled) => return Err(JobFailure::Cancelled),
                Err(e @ RouterError::AllSourcesFailed { .. }) => {
                    warn!(domain = %target.domain, error = %e, "Target listing failed on all sources");
                    targets_failed += 1;
                    continue;
                }
                Err(e) => {
                    warn!(domain = %target.domain, error = %e, "Target listing failed");
                    targets_failed += 1;
                    continue;
                }
            };

            let mut counters = SessionCounters::default();
            let total_records = listing.records.len();

            for (i, capture) in listing.records.iter().enumerate() {
                ctx.checkpoint()?;

                let verdict = deps
                    .filter
                    .classify(capture, &target, &filter_config, &deps.store, false)
                    .await
                    .map_err(JobFailure::Retriable)?;

                counters.discovered += 1;
                match verdict {
                    FilterVerdict::Drop { .. } => {
                        *counters
                            .filtered_by_reason
                            .entry(PageStatus::FilteredFileExtension.as_str().to_string())
                            .or_default() += 1;
                    }
                    FilterVerdict::PreserveOverride => {}
                    FilterVerdict::Classified(classification) => {
                        if classification.status != PageStatus::Pending {
                            *counters
                                .filtered_by_reason
                                .entry(classification.status.as_str().to_string())
                                .or_default() += 1;
                        }
                        deps.facade
                            .upsert_scrape_page(
                                target.id,
                                project.id,
                                Some(payload.session_id),
                                capture,
                                &classification,
                            )
                            .await
                            .map_err(|e| JobFailure::Retriable(e.into()))?;
                    }
                }

                if i % 100 == 0 {
                    ctx.progress(
                        i as i64,
                        Some(total_records as i64),
                        Some(&format!("classifying {}", target.domain)),
                    )
                    .await;
                }
            }

            total_discovered += counters.discovered;
            deps.facade
                .increment_session_counters(payload.session_id, &counters)
                .await
                .map_err(|e| JobFailure::Retriable(e.into()))?;

            processed_targets += 1;
            ctx.progress(
                processed_targets,
                Some(targets.len() as i64),
                Some(&format!("target {} done", target.domain)),
            )
            .await;
        }

        // Fan out extraction batches over everything now pending, in
        // deterministic (url, timestamp) order.
        let mut batches = 0usize;
        let pending = deps
            .store
            .pending_for_session(payload.session_id, 10_000)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;
        for chunk in pending.chunks(deps.extract_batch_size) {
            let batch = ExtractBatchPayload {
                project_id: project.id,
                session_id: payload.session_id,
                scrape_page_ids: chunk.iter().map(|row| row.id).collect(),
            };
            ctx.store()
                .enqueue(
                    QueueName::Scraping,
                    EXTRACT_BATCH_JOB,
                    serde_json::to_value(&batch).map_err(|e| JobFailure::Permanent(e.into()))?,
                    EnqueueOptions {
                        parent_id: Some(ctx.job_id),
                        session_id: Some(payload.session_id),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| JobFailure::Retriable(anyhow::anyhow!(e)))?;
            batches += 1;
        }

        if batches == 0 {
            // Nothing to extract: the session ends here. It only counts as
            // failed when no captures were ingested and a target broke.
            let state = if total_discovered == 0 && targets_failed > 0 {
                SessionState::Failed
            } else {
                SessionState::Completed
            };
            deps.facade
                .finish_session(payload.session_id, state)
                .await
                .map_err(|e| JobFailure::Retriable(e.into()))?;
        }

        info!(
            project_id = %project.id,
            session_id = %payload.session_id,
            discovered = total_discovered,
            batches,
            targets_failed,
            "Scrape run discovery finished"
        );
        Ok(())
    }
}

/// Per-project filter settings stored as JSONB on the project row.
pub fn parse_filter_config(raw: &serde_json::Value) -> FilterConfig {
    let mut config = FilterConfig::default();
    if let Some(min) = raw.get("min_size").and_then(serde_json::Value::as_u64) {
        config.min_size = min;
    }
    if let Some(max) = raw.get("max_size").and_then(serde_json::Value::as_u64) {
        config.max_size = max;
    }
    if let Some(threshold) = raw
        .get("low_priority_threshold")
        .and_then(serde_json::Value::as_u64)
    {
        config.low_priority_threshold = threshold.min(10) as u8;
    }
    if let Some(rules) = raw.get("custom_rules").and_then(serde_json::Value::as_array) {
        for rule in rules {
            if let (Some(id), Some(pattern)) = (
                rule.get("id").and_then(serde_json::Value::as_str),
                rule.get("pattern").and_then(serde_json::Value::as_str),
            ) {
                config.custom_rules.push(hindsite_filter::CustomRule {
                    id: id.to_string(),
                    pattern: pattern.to_string(),
                });
            }
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_config_parses_overrides() {
        let raw = serde_json::json!({
            "min_size": 512,
            "max_size": 1048576,
            "low_priority_threshold": 3,
            "custom_rules": [{"id": "no_drafts", "pattern": "/drafts/"}],
        });
        let config = parse_filter_config(&raw);
        assert_eq!(config.min_size, 512);
        assert_eq!(config.max_size, 1_048_576);
        assert_eq!(config.low_priority_threshold, 3);
        assert_eq!(config.custom_rules.len(), 1);
    }

    #[test]
    fn filter_config_defaults_on_empty() {
        let config = parse_filter_config(&serde_json::json!({}));
        assert_eq!(config.low_priority_threshold, 2);
        assert!(config.custom_rules.is_empty());
    }
}
