//! Persistence facade: every write is one transaction that also appends the
//! dual-write intent and change-log entry (outbox pattern). Status
//! transitions are enforced here, nowhere else.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use hindsite_common::{
    CaptureRecord, ConsistencyLevel, ExtractedContent, PageStatus, SessionCounters, SessionState,
};
use hindsite_filter::Classification;

use crate::models::{PageRow, ScrapePageRow, SessionRow};
use crate::outbox::{append_change, append_intent, append_intent_committed, IntentInsert};
use crate::transitions::{self, InvalidTransition};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("scrape page {scrape_page} and page {page} belong to different projects")]
    LinkAcrossProjects { scrape_page: Uuid, page: Uuid },

    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("strong-consistency sync did not acknowledge within {0:?}")]
    StrongSyncTimeout(Duration),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Synchronous analytical-store handoff for strong consistency. Implemented
/// by the synchronizer; the facade only sees this seam.
#[async_trait]
pub trait AnalyticalApply: Send + Sync {
    async fn apply(
        &self,
        op: &str,
        table_name: &str,
        primary_key: Uuid,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// How facade writes reach the analytical store.
#[derive(Clone)]
pub struct SyncPolicy {
    pub level: ConsistencyLevel,
    /// Required for `strong`; ignored otherwise.
    pub handoff: Option<Arc<dyn AnalyticalApply>>,
    /// Bounded wait for the strong handoff.
    pub strong_wait: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            level: ConsistencyLevel::Eventual,
            handoff: None,
            strong_wait: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct PersistenceFacade {
    pool: PgPool,
    sync: SyncPolicy,
}

impl PersistenceFacade {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            sync: SyncPolicy::default(),
        }
    }

    pub fn with_sync(pool: PgPool, sync: SyncPolicy) -> Self {
        Self { pool, sync }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Record one monitored write into the outbox and change feed. Under
    /// strong consistency the analytical write is applied before the primary
    /// commit; on timeout the whole transaction rolls back with the error.
    async fn record_write(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        table_name: &str,
        primary_key: Uuid,
        op: &str,
        payload: serde_json::Value,
    ) -> Result<i64, StoreError> {
        append_change(tx, table_name, primary_key, op, &payload).await?;

        let intent = IntentInsert {
            op: op.to_string(),
            table_name: table_name.to_string(),
            primary_key,
            payload,
        };

        if self.sync.level == ConsistencyLevel::Strong {
            if let Some(handoff) = &self.sync.handoff {
                let applied = tokio::time::timeout(
                    self.sync.strong_wait,
                    handoff.apply(&intent.op, table_name, primary_key, &intent.payload),
                )
                .await;
                match applied {
                    Ok(Ok(())) => return Ok(append_intent_committed(tx, &intent).await?),
                    Ok(Err(e)) => {
                        warn!(table_name, error = %e, "Strong sync failed, rolling back");
                        return Err(StoreError::StrongSyncTimeout(self.sync.strong_wait));
                    }
                    Err(_) => return Err(StoreError::StrongSyncTimeout(self.sync.strong_wait)),
                }
            }
        }

        Ok(append_intent(tx, &intent).await?)
    }

    // -----------------------------------------------------------------------
    // Scrape pages
    // -----------------------------------------------------------------------

    /// Upsert the per-capture record. Unique on (target, url, timestamp);
    /// re-running the same classification is a no-op, and manually
    /// overridden rows keep their frozen decision fields.
    pub async fn upsert_scrape_page(
        &self,
        target_id: Uuid,
        project_id: Uuid,
        session_id: Option<Uuid>,
        capture: &CaptureRecord,
        classification: &Classification,
    ) -> Result<(Uuid, bool), StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<ScrapePageRow> = sqlx::query_as(
            r#"
            SELECT * FROM scrape_pages
            WHERE target_id = $1 AND original_url = $2 AND capture_timestamp = $3
            FOR UPDATE
            "#,
        )
        .bind(target_id)
        .bind(&capture.original_url)
        .bind(&capture.timestamp)
        .fetch_optional(&mut *tx)
        .await?;

        let details = classification
            .details
            .as_ref()
            .map(|d| serde_json::to_value(d).unwrap_or_default());

        let (row, created) = match existing {
            Some(existing) if existing.is_manually_overridden => {
                // Frozen by an operator; nothing to change.
                tx.commit().await?;
                return Ok((existing.id, false));
            }
            Some(existing)
                if matches!(
                    existing.status.parse::<PageStatus>(),
                    Ok(PageStatus::InProgress | PageStatus::Completed)
                ) =>
            {
                // In-flight or finished work is never clobbered by a
                // rediscovery of the same capture.
                tx.commit().await?;
                return Ok((existing.id, false));
            }
            Some(existing) => {
                let row: ScrapePageRow = sqlx::query_as(
                    r#"
                    UPDATE scrape_pages
                    SET mime_type = $1, status_code = $2, digest = $3, length = $4,
                        status = $5, priority_score = $6, filter_reason = $7,
                        filter_category = $8, filter_details = $9, matched_pattern = $10,
                        filter_confidence = $11, related_page_id = $12,
                        can_be_manually_processed = $13, session_id = COALESCE($14, session_id),
                        updated_at = NOW()
                    WHERE id = $15
                    RETURNING *
                    "#,
                )
                .bind(&capture.mime_type)
                .bind(&capture.status_code)
                .bind(&capture.digest)
                .bind(capture.length as i64)
                .bind(classification.status.as_str())
                .bind(classification.priority_score as i32)
                .bind(&classification.filter_reason)
                .bind(classification.filter_category.map(|c| c.to_string()))
                .bind(&details)
                .bind(&classification.matched_pattern)
                .bind(classification.filter_confidence)
                .bind(classification.related_page_id)
                .bind(classification.can_be_manually_processed)
                .bind(session_id)
                .bind(existing.id)
                .fetch_one(&mut *tx)
                .await?;
                (row, false)
            }
            None => {
                let row: ScrapePageRow = sqlx::query_as(
                    r#"
                    INSERT INTO scrape_pages
                        (target_id, session_id, original_url, capture_timestamp, mime_type,
                         status_code, digest, length, status, priority_score, filter_reason,
                         filter_category, filter_details, matched_pattern, filter_confidence,
                         related_page_id, can_be_manually_processed)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                    ON CONFLICT (target_id, original_url, capture_timestamp)
                    DO UPDATE SET updated_at = NOW()
                    RETURNING *
                    "#,
                )
                .bind(target_id)
                .bind(session_id)
                .bind(&capture.original_url)
                .bind(&capture.timestamp)
                .bind(&capture.mime_type)
                .bind(&capture.status_code)
                .bind(&capture.digest)
                .bind(capture.length as i64)
                .bind(classification.status.as_str())
                .bind(classification.priority_score as i32)
                .bind(&classification.filter_reason)
                .bind(classification.filter_category.map(|c| c.to_string()))
                .bind(&details)
                .bind(&classification.matched_pattern)
                .bind(classification.filter_confidence)
                .bind(classification.related_page_id)
                .bind(classification.can_be_manually_processed)
                .fetch_one(&mut *tx)
                .await?;
                (row, true)
            }
        };

        let payload = scrape_page_payload(&row, project_id);
        self.record_write(
            &mut tx,
            "scrape_pages",
            row.id,
            if created { "create" } else { "update" },
            payload,
        )
        .await?;

        tx.commit().await?;
        Ok((row.id, created))
    }

    /// Move a scrape page through the processing loop, enforcing the
    /// transition table.
    pub async fn set_status(
        &self,
        scrape_page_id: Uuid,
        project_id: Uuid,
        new_status: PageStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row: ScrapePageRow =
            sqlx::query_as("SELECT * FROM scrape_pages WHERE id = $1 FOR UPDATE")
                .bind(scrape_page_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::NotFound("scrape page", scrape_page_id.to_string()))?;

        let current: PageStatus = row
            .status
            .parse()
            .map_err(|_| StoreError::NotFound("status", row.status.clone()))?;
        transitions::check(current, new_status)?;

        let row: ScrapePageRow = sqlx::query_as(
            r#"
            UPDATE scrape_pages
            SET status = $1, last_error = COALESCE($2, last_error), updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(new_status.as_str())
        .bind(error)
        .bind(scrape_page_id)
        .fetch_one(&mut *tx)
        .await?;

        let payload = scrape_page_payload(&row, project_id);
        self.record_write(&mut tx, "scrape_pages", row.id, "update", payload)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Operator override: freezes the original decision and moves the page
    /// to manually_approved or manually_skipped.
    pub async fn mark_manual_override(
        &self,
        scrape_page_id: Uuid,
        project_id: Uuid,
        new_status: PageStatus,
        actor: &str,
        reason: &str,
    ) -> Result<ScrapePageRow, StoreError> {
        assert!(
            matches!(
                new_status,
                PageStatus::ManuallyApproved | PageStatus::ManuallySkipped
            ),
            "manual override targets manually_approved or manually_skipped"
        );

        let mut tx = self.pool.begin().await?;
        let row: ScrapePageRow =
            sqlx::query_as("SELECT * FROM scrape_pages WHERE id = $1 FOR UPDATE")
                .bind(scrape_page_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::NotFound("scrape page", scrape_page_id.to_string()))?;

        let current: PageStatus = row
            .status
            .parse()
            .map_err(|_| StoreError::NotFound("status", row.status.clone()))?;
        transitions::check(current, new_status)?;

        // Only the first override records the original decision.
        let original = row
            .original_filter_decision
            .clone()
            .unwrap_or_else(|| row.status.clone());

        let row: ScrapePageRow = sqlx::query_as(
            r#"
            UPDATE scrape_pages
            SET status = $1,
                is_manually_overridden = TRUE,
                original_filter_decision = $2,
                updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(new_status.as_str())
        .bind(&original)
        .bind(scrape_page_id)
        .fetch_one(&mut *tx)
        .await?;

        info!(
            scrape_page_id = %scrape_page_id,
            new_status = new_status.as_str(),
            actor,
            reason,
            "Manual override recorded"
        );

        let payload = scrape_page_payload(&row, project_id);
        self.record_write(&mut tx, "scrape_pages", row.id, "update", payload)
            .await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Approved pages re-enter the queue as pending.
    pub async fn reset_to_pending(
        &self,
        scrape_page_id: Uuid,
        project_id: Uuid,
    ) -> Result<(), StoreError> {
        self.set_status(scrape_page_id, project_id, PageStatus::Pending, None)
            .await
    }

    /// Adjust a capture's processing priority.
    pub async fn update_priority(
        &self,
        scrape_page_id: Uuid,
        project_id: Uuid,
        priority_score: u8,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<ScrapePageRow> = sqlx::query_as(
            r#"
            UPDATE scrape_pages
            SET priority_score = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(priority_score.clamp(1, 10) as i32)
        .bind(scrape_page_id)
        .fetch_optional(&mut *tx)
        .await?;
        let row = row.ok_or_else(|| StoreError::NotFound("scrape page", scrape_page_id.to_string()))?;

        let payload = scrape_page_payload(&row, project_id);
        self.record_write(&mut tx, "scrape_pages", row.id, "update", payload)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove a scrape page, propagating the delete to the analytical store.
    pub async fn delete_scrape_page(
        &self,
        scrape_page_id: Uuid,
        _project_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM scrape_pages WHERE id = $1")
            .bind(scrape_page_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound("scrape page", scrape_page_id.to_string()));
        }

        let payload = serde_json::json!({ "id": scrape_page_id });
        self.record_write(&mut tx, "scrape_pages", scrape_page_id, "delete", payload)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pages
    // -----------------------------------------------------------------------

    /// Materialize extracted content. Unique on (target, content_digest);
    /// re-materializing advances last_seen_timestamp to the max.
    pub async fn materialize_page(
        &self,
        target_id: Uuid,
        extraction: &ExtractedContent,
    ) -> Result<(Uuid, bool), StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<PageRow> = sqlx::query_as(
            r#"
            SELECT * FROM pages
            WHERE target_id = $1 AND content_digest = $2
            FOR UPDATE
            "#,
        )
        .bind(target_id)
        .bind(&extraction.content_digest)
        .fetch_optional(&mut *tx)
        .await?;

        let (row, created) = match existing {
            Some(existing) => {
                let row: PageRow = sqlx::query_as(
                    r#"
                    UPDATE pages
                    SET last_seen_timestamp = GREATEST(last_seen_timestamp, $1),
                        first_seen_timestamp = LEAST(first_seen_timestamp, $1),
                        updated_at = NOW()
                    WHERE id = $2
                    RETURNING *
                    "#,
                )
                .bind(&extraction.capture_timestamp)
                .bind(existing.id)
                .fetch_one(&mut *tx)
                .await?;
                (row, false)
            }
            None => {
                let row: PageRow = sqlx::query_as(
                    r#"
                    INSERT INTO pages
                        (target_id, original_url, first_seen_timestamp, last_seen_timestamp,
                         content_digest, extracted_title, extracted_text, extracted_markdown,
                         language, word_count, char_count, extraction_method,
                         extraction_confidence, quality_score, metadata)
                    VALUES ($1, $2, $3, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    ON CONFLICT (target_id, content_digest)
                    DO UPDATE SET
                        last_seen_timestamp = GREATEST(pages.last_seen_timestamp, $3),
                        updated_at = NOW()
                    RETURNING *
                    "#,
                )
                .bind(target_id)
                .bind(&extraction.original_url)
                .bind(&extraction.capture_timestamp)
                .bind(&extraction.content_digest)
                .bind(&extraction.title)
                .bind(&extraction.text)
                .bind(&extraction.markdown)
                .bind(&extraction.language)
                .bind(extraction.word_count as i32)
                .bind(extraction.char_count as i32)
                .bind(&extraction.extraction_method)
                .bind(extraction.extraction_confidence)
                .bind(extraction.quality_score as i32)
                .bind(&extraction.metadata)
                .fetch_one(&mut *tx)
                .await?;
                (row, true)
            }
        };

        let payload = page_payload(&row);
        self.record_write(
            &mut tx,
            "pages",
            row.id,
            if created { "create" } else { "update" },
            payload,
        )
        .await?;

        tx.commit().await?;
        Ok((row.id, created))
    }

    /// Point a scrape page at the page holding its content. Both must belong
    /// to the same project.
    pub async fn link_scrape_page_to_page(
        &self,
        scrape_page_id: Uuid,
        page_id: Uuid,
    ) -> Result<(), StoreError> {
        let same_project: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT st.project_id = pt.project_id
            FROM scrape_pages sp
            JOIN targets st ON st.id = sp.target_id
            CROSS JOIN pages p
            JOIN targets pt ON pt.id = p.target_id
            WHERE sp.id = $1 AND p.id = $2
            "#,
        )
        .bind(scrape_page_id)
        .bind(page_id)
        .fetch_optional(&self.pool)
        .await?;

        match same_project {
            None => {
                return Err(StoreError::NotFound(
                    "scrape page or page",
                    format!("{scrape_page_id}/{page_id}"),
                ))
            }
            Some(false) => {
                return Err(StoreError::LinkAcrossProjects {
                    scrape_page: scrape_page_id,
                    page: page_id,
                })
            }
            Some(true) => {}
        }

        sqlx::query(
            r#"
            UPDATE scrape_pages SET related_page_id = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(page_id)
        .bind(scrape_page_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub async fn create_session(
        &self,
        project_id: Uuid,
        from_date: chrono::NaiveDate,
        to_date: chrono::NaiveDate,
    ) -> Result<SessionRow, StoreError> {
        let row: SessionRow = sqlx::query_as(
            r#"
            INSERT INTO sessions (project_id, from_date, to_date, state, started_at)
            VALUES ($1, $2, $3, 'pending', NOW())
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(from_date)
        .bind(to_date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Merge counter deltas into the session row (read-modify-write under
    /// row lock, deltas are additive).
    pub async fn increment_session_counters(
        &self,
        session_id: Uuid,
        deltas: &SessionCounters,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row: SessionRow = sqlx::query_as("SELECT * FROM sessions WHERE id = $1 FOR UPDATE")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound("session", session_id.to_string()))?;

        let mut counters: SessionCounters =
            serde_json::from_value(row.counters.clone()).unwrap_or_default();
        counters.merge(deltas);

        let counters_json = serde_json::to_value(&counters).unwrap_or_default();
        sqlx::query("UPDATE sessions SET counters = $1 WHERE id = $2")
            .bind(&counters_json)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        let payload = session_payload(&row, &counters, row.state.as_str());
        self.record_write(&mut tx, "sessions", session_id, "update", payload)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Move a session between live states without finishing it.
    pub async fn set_session_state(
        &self,
        session_id: Uuid,
        state: SessionState,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE sessions SET state = $1 WHERE id = $2")
            .bind(state.to_string())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound("session", session_id.to_string()));
        }
        Ok(())
    }

    pub async fn finish_session(
        &self,
        session_id: Uuid,
        state: SessionState,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row: SessionRow = sqlx::query_as(
            r#"
            UPDATE sessions SET state = $1, finished_at = NOW()
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(state.to_string())
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound("session", session_id.to_string()))?;

        let counters: SessionCounters =
            serde_json::from_value(row.counters.clone()).unwrap_or_default();
        let payload = session_payload(&row, &counters, &state.to_string());
        self.record_write(&mut tx, "sessions", session_id, "update", payload)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Search-index outbox
    // -----------------------------------------------------------------------

    /// Publish an upsert event for the external search sink.
    pub async fn emit_index_upsert(&self, page: &PageRow) -> Result<(), StoreError> {
        let payload = serde_json::json!({
            "op": "upsert",
            "page_id": page.id,
            "target_ref": page.target_id,
            "original_url": page.original_url,
            "content_digest": page.content_digest,
            "title": page.extracted_title,
            "text": page.extracted_text,
            "metadata": page.metadata,
            "quality_score": page.quality_score,
            "last_seen_timestamp": page.last_seen_timestamp,
        });
        sqlx::query(
            r#"
            INSERT INTO search_index_events (op, page_id, payload)
            VALUES ('upsert', $1, $2)
            "#,
        )
        .bind(page.id)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn emit_index_delete(&self, page_id: Uuid) -> Result<(), StoreError> {
        let payload = serde_json::json!({ "op": "delete", "page_id": page_id });
        sqlx::query(
            r#"
            INSERT INTO search_index_events (op, page_id, payload)
            VALUES ('delete', $1, $2)
            "#,
        )
        .bind(page_id)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Analytical payloads
// ---------------------------------------------------------------------------

/// Denormalized analytical copy of a scrape page. The payload is what the
/// synchronizer applies; columns match analytics.scrape_pages.
pub fn scrape_page_payload(row: &ScrapePageRow, project_id: Uuid) -> serde_json::Value {
    serde_json::json!({
        "id": row.id,
        "project_id": project_id,
        "target_id": row.target_id,
        "session_id": row.session_id,
        "original_url": row.original_url,
        "capture_timestamp": row.capture_timestamp,
        "mime_type": row.mime_type,
        "status_code": row.status_code,
        "digest": row.digest,
        "length": row.length,
        "status": row.status,
        "priority_score": row.priority_score,
        "filter_reason": row.filter_reason,
        "filter_category": row.filter_category,
        "filter_confidence": row.filter_confidence,
        "updated_at": Utc::now(),
    })
}

pub fn page_payload(row: &PageRow) -> serde_json::Value {
    serde_json::json!({
        "id": row.id,
        "target_id": row.target_id,
        "original_url": row.original_url,
        "first_seen_timestamp": row.first_seen_timestamp,
        "last_seen_timestamp": row.last_seen_timestamp,
        "content_digest": row.content_digest,
        "extracted_title": row.extracted_title,
        "language": row.language,
        "word_count": row.word_count,
        "extraction_method": row.extraction_method,
        "quality_score": row.quality_score,
        "updated_at": Utc::now(),
    })
}

fn session_payload(
    row: &SessionRow,
    counters: &SessionCounters,
    state: &str,
) -> serde_json::Value {
    serde_json::json!({
        "session_id": row.id,
        "project_id": row.project_id,
        "state": state,
        "discovered": counters.discovered,
        "extracted_ok": counters.extracted_ok,
        "extracted_failed": counters.extracted_failed,
        "counters": counters,
        "updated_at": Utc::now(),
    })
}
