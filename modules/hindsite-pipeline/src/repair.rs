//! The repair_key handler: re-emit a dual-write intent for a key the
//! consistency validator flagged, so the synchronizer brings the analytical
//! store back in line.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use hindsite_jobs::{JobContext, JobFailure, JobHandler};
use hindsite_store::{
    page_payload, scrape_page_payload, IntentInsert, OutboxStore, PageRow, ScrapePageRow,
};
use hindsite_sync::REPAIR_JOB_TYPE;

use crate::deps::PipelineDeps;

#[derive(Debug, Serialize, Deserialize)]
pub struct RepairKeyPayload {
    pub table: String,
    pub key: Uuid,
}

pub struct RepairKeyHandler {
    deps: Arc<PipelineDeps>,
    outbox: OutboxStore,
}

impl RepairKeyHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        let outbox = OutboxStore::new(deps.store.pool().clone());
        Self { deps, outbox }
    }
}

#[async_trait]
impl JobHandler for RepairKeyHandler {
    fn job_type(&self) -> &'static str {
        REPAIR_JOB_TYPE
    }

    async fn run(&self, ctx: JobContext) -> Result<(), JobFailure> {
        let payload: RepairKeyPayload = serde_json::from_value(ctx.payload.clone())
            .map_err(|e| JobFailure::Permanent(anyhow::anyhow!("bad payload: {e}")))?;
        let pool = self.deps.store.pool();

        let intent = match payload.table.as_str() {
            "scrape_pages" => {
                let row: Option<ScrapePageRow> =
                    sqlx::query_as("SELECT * FROM scrape_pages WHERE id = $1")
                        .bind(payload.key)
                        .fetch_optional(pool)
                        .await
                        .map_err(|e| JobFailure::Retriable(e.into()))?;
                match row {
                    Some(row) => {
                        let project_id: Uuid = sqlx::query_scalar(
                            "SELECT project_id FROM targets WHERE id = $1",
                        )
                        .bind(row.target_id)
                        .fetch_one(pool)
                        .await
                        .map_err(|e| JobFailure::Retriable(e.into()))?;
                        IntentInsert {
                            op: "update".into(),
                            table_name: "scrape_pages".into(),
                            primary_key: row.id,
                            payload: scrape_page_payload(&row, project_id),
                        }
                    }
                    // Row is gone from the source of truth: propagate the
                    // delete to the analytical side.
                    None => IntentInsert {
                        op: "delete".into(),
                        table_name: "scrape_pages".into(),
                        primary_key: payload.key,
                        payload: serde_json::json!({ "id": payload.key }),
                    },
                }
            }
            "pages" => {
                let row: Option<PageRow> = sqlx::query_as("SELECT * FROM pages WHERE id = $1")
                    .bind(payload.key)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| JobFailure::Retriable(e.into()))?;
                match row {
                    Some(row) => IntentInsert {
                        op: "update".into(),
                        table_name: "pages".into(),
                        primary_key: row.id,
                        payload: page_payload(&row),
                    },
                    None => IntentInsert {
                        op: "delete".into(),
                        table_name: "pages".into(),
                        primary_key: payload.key,
                        payload: serde_json::json!({ "id": payload.key }),
                    },
                }
            }
            other => {
                warn!(table = other, "Repair requested for unmonitored table");
                return Err(JobFailure::Permanent(anyhow::anyhow!(
                    "unmonitored table: {other}"
                )));
            }
        };

        self.outbox
            .append_standalone(&intent)
            .await
            .map_err(|e| JobFailure::Retriable(e.into()))?;
        info!(table = payload.table.as_str(), key = %payload.key, "Repair intent emitted");
        Ok(())
    }
}
