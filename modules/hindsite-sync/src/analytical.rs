//! Analytical store writer. The synchronizer is the only writer; the
//! transactional store is always source of truth, and conflicts are decided
//! by payload hash and submission time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use hindsite_store::{AnalyticalApply, IntentRow};

/// Tables mirrored into the analytics schema.
pub const MONITORED_TABLES: &[&str] = &["scrape_pages", "pages", "sessions"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Row written (insert or overwrite).
    Applied,
    /// Identical payload already present; nothing to do.
    AlreadyCurrent,
    /// Analytical row is newer with different content; intent discarded.
    Conflict,
}

#[derive(Clone)]
pub struct AnalyticalStore {
    pool: PgPool,
}

impl AnalyticalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply one intent under the conflict policy:
    /// equal hash → already current; analytical row newer than the intent's
    /// submission → conflict (discard); otherwise write.
    pub async fn apply_intent(&self, intent: &IntentRow) -> anyhow::Result<ApplyOutcome> {
        if intent.op == "delete" {
            self.delete(&intent.table_name, intent.primary_key).await?;
            return Ok(ApplyOutcome::Applied);
        }

        let existing = self
            .existing_row_meta(&intent.table_name, intent.primary_key)
            .await?;
        if let Some((hash, updated_at)) = existing {
            if hash == intent.payload_hash {
                return Ok(ApplyOutcome::AlreadyCurrent);
            }
            if updated_at > intent.submitted_at {
                warn!(
                    table = intent.table_name.as_str(),
                    key = %intent.primary_key,
                    "Analytical row is newer than intent, discarding"
                );
                return Ok(ApplyOutcome::Conflict);
            }
        }

        self.upsert(
            &intent.table_name,
            intent.primary_key,
            &intent.payload,
            &intent.payload_hash,
        )
        .await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn existing_row_meta(
        &self,
        table_name: &str,
        primary_key: Uuid,
    ) -> anyhow::Result<Option<(String, DateTime<Utc>)>> {
        let sql = match table_name {
            "scrape_pages" => {
                "SELECT payload_hash, updated_at FROM analytics.scrape_pages WHERE id = $1"
            }
            "pages" => "SELECT payload_hash, updated_at FROM analytics.pages WHERE id = $1",
            "sessions" => {
                "SELECT payload_hash, updated_at FROM analytics.session_stats WHERE session_id = $1"
            }
            other => anyhow::bail!("unmonitored table: {other}"),
        };
        let row: Option<(String, DateTime<Utc>)> = sqlx::query_as(sql)
            .bind(primary_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn delete(&self, table_name: &str, primary_key: Uuid) -> anyhow::Result<()> {
        let sql = match table_name {
            "scrape_pages" => "DELETE FROM analytics.scrape_pages WHERE id = $1",
            "pages" => "DELETE FROM analytics.pages WHERE id = $1",
            "sessions" => "DELETE FROM analytics.session_stats WHERE session_id = $1",
            other => anyhow::bail!("unmonitored table: {other}"),
        };
        sqlx::query(sql).bind(primary_key).execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        table_name: &str,
        primary_key: Uuid,
        payload: &Value,
        payload_hash: &str,
    ) -> anyhow::Result<()> {
        match table_name {
            "scrape_pages" => self.upsert_scrape_page(primary_key, payload, payload_hash).await,
            "pages" => self.upsert_page(primary_key, payload, payload_hash).await,
            "sessions" => self.upsert_session(primary_key, payload, payload_hash).await,
            other => anyhow::bail!("unmonitored table: {other}"),
        }
    }

    async fn upsert_scrape_page(
        &self,
        id: Uuid,
        payload: &Value,
        payload_hash: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analytics.scrape_pages
                (id, project_id, target_id, session_id, original_url, capture_timestamp,
                 mime_type, status_code, digest, length, status, priority_score,
                 filter_reason, filter_category, filter_confidence, payload_hash, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id) DO UPDATE SET
                session_id = EXCLUDED.session_id,
                mime_type = EXCLUDED.mime_type,
                status_code = EXCLUDED.status_code,
                digest = EXCLUDED.digest,
                length = EXCLUDED.length,
                status = EXCLUDED.status,
                priority_score = EXCLUDED.priority_score,
                filter_reason = EXCLUDED.filter_reason,
                filter_category = EXCLUDED.filter_category,
                filter_confidence = EXCLUDED.filter_confidence,
                payload_hash = EXCLUDED.payload_hash,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(id)
        .bind(field_uuid(payload, "project_id"))
        .bind(field_uuid(payload, "target_id").unwrap_or(id))
        .bind(field_uuid(payload, "session_id"))
        .bind(field_str(payload, "original_url"))
        .bind(field_str(payload, "capture_timestamp"))
        .bind(field_str(payload, "mime_type"))
        .bind(field_str(payload, "status_code"))
        .bind(field_str(payload, "digest"))
        .bind(payload.get("length").and_then(Value::as_i64).unwrap_or(0))
        .bind(field_str(payload, "status"))
        .bind(payload.get("priority_score").and_then(Value::as_i64).unwrap_or(5) as i32)
        .bind(field_str_opt(payload, "filter_reason"))
        .bind(field_str_opt(payload, "filter_category"))
        .bind(payload.get("filter_confidence").and_then(Value::as_f64).map(|v| v as f32))
        .bind(payload_hash)
        .bind(field_time(payload, "updated_at"))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_page(&self, id: Uuid, payload: &Value, payload_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analytics.pages
                (id, target_id, original_url, first_seen_timestamp, last_seen_timestamp,
                 content_digest, extracted_title, language, word_count, extraction_method,
                 quality_score, payload_hash, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                first_seen_timestamp = EXCLUDED.first_seen_timestamp,
                last_seen_timestamp = EXCLUDED.last_seen_timestamp,
                extracted_title = EXCLUDED.extracted_title,
                language = EXCLUDED.language,
                word_count = EXCLUDED.word_count,
                extraction_method = EXCLUDED.extraction_method,
                quality_score = EXCLUDED.quality_score,
                payload_hash = EXCLUDED.payload_hash,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(id)
        .bind(field_uuid(payload, "target_id").unwrap_or(id))
        .bind(field_str(payload, "original_url"))
        .bind(field_str_opt(payload, "first_seen_timestamp"))
        .bind(field_str_opt(payload, "last_seen_timestamp"))
        .bind(field_str(payload, "content_digest"))
        .bind(field_str_opt(payload, "extracted_title"))
        .bind(field_str_opt(payload, "language"))
        .bind(payload.get("word_count").and_then(Value::as_i64).unwrap_or(0) as i32)
        .bind(field_str_opt(payload, "extraction_method"))
        .bind(payload.get("quality_score").and_then(Value::as_i64).unwrap_or(0) as i32)
        .bind(payload_hash)
        .bind(field_time(payload, "updated_at"))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_session(
        &self,
        session_id: Uuid,
        payload: &Value,
        payload_hash: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analytics.session_stats
                (session_id, project_id, state, discovered, extracted_ok, extracted_failed,
                 counters, payload_hash, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (session_id) DO UPDATE SET
                state = EXCLUDED.state,
                discovered = EXCLUDED.discovered,
                extracted_ok = EXCLUDED.extracted_ok,
                extracted_failed = EXCLUDED.extracted_failed,
                counters = EXCLUDED.counters,
                payload_hash = EXCLUDED.payload_hash,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(session_id)
        .bind(field_uuid(payload, "project_id"))
        .bind(field_str_opt(payload, "state"))
        .bind(payload.get("discovered").and_then(Value::as_i64).unwrap_or(0))
        .bind(payload.get("extracted_ok").and_then(Value::as_i64).unwrap_or(0))
        .bind(payload.get("extracted_failed").and_then(Value::as_i64).unwrap_or(0))
        .bind(payload.get("counters").cloned().unwrap_or_else(|| serde_json::json!({})))
        .bind(payload_hash)
        .bind(field_time(payload, "updated_at"))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Strong-consistency seam: the facade hands payloads straight here before
/// committing the primary transaction.
#[async_trait]
impl AnalyticalApply for AnalyticalStore {
    async fn apply(
        &self,
        op: &str,
        table_name: &str,
        primary_key: Uuid,
        payload: &Value,
    ) -> anyhow::Result<()> {
        if op == "delete" {
            return self.delete(table_name, primary_key).await;
        }
        let hash = hindsite_common::payload_hash(payload);
        self.upsert(table_name, primary_key, payload, &hash).await
    }
}

fn field_str(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn field_str_opt(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

fn field_uuid(payload: &Value, key: &str) -> Option<Uuid> {
    payload.get(key).and_then(Value::as_str).and_then(|s| s.parse().ok())
}

fn field_time(payload: &Value, key: &str) -> DateTime<Utc> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}
