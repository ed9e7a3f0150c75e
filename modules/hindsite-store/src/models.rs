//! Row types for the transactional store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProjectRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: String,
    pub archive_policy: serde_json::Value,
    pub filter_config: serde_json::Value,
    pub consistency_level: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TargetRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub domain: String,
    pub match_type: String,
    pub url_path: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub include_attachments: bool,
    pub created_at: DateTime<Utc>,
}

impl TargetRow {
    /// Convert to the shared target shape the router and filter consume.
    pub fn to_target(&self) -> anyhow::Result<hindsite_common::Target> {
        Ok(hindsite_common::Target {
            id: self.id,
            project_id: self.project_id,
            domain: self.domain.clone(),
            match_type: self
                .match_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            url_path: self.url_path.clone(),
            from_date: self.from_date,
            to_date: self.to_date,
            include_attachments: self.include_attachments,
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SessionRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub state: String,
    pub counters: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScrapePageRow {
    pub id: Uuid,
    pub target_id: Uuid,
    pub session_id: Option<Uuid>,
    pub original_url: String,
    pub capture_timestamp: String,
    pub mime_type: String,
    pub status_code: String,
    pub digest: String,
    pub length: i64,
    pub status: String,
    pub priority_score: i32,
    pub filter_reason: Option<String>,
    pub filter_category: Option<String>,
    pub filter_details: Option<serde_json::Value>,
    pub matched_pattern: Option<String>,
    pub filter_confidence: Option<f32>,
    pub related_page_id: Option<Uuid>,
    pub is_manually_overridden: bool,
    pub original_filter_decision: Option<String>,
    pub can_be_manually_processed: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PageRow {
    pub id: Uuid,
    pub target_id: Uuid,
    pub original_url: String,
    pub first_seen_timestamp: String,
    pub last_seen_timestamp: String,
    pub content_digest: String,
    pub extracted_title: String,
    pub extracted_text: String,
    pub extracted_markdown: Option<String>,
    pub language: String,
    pub word_count: i32,
    pub char_count: i32,
    pub extraction_method: String,
    pub extraction_confidence: f32,
    pub quality_score: i32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct IntentRow {
    pub id: i64,
    pub op: String,
    pub table_name: String,
    pub primary_key: Uuid,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub state: String,
    pub attempts: i32,
    pub submitted_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub claim_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChangeLogRow {
    pub seq: i64,
    pub table_name: String,
    pub primary_key: Uuid,
    pub op: String,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeadLetterRow {
    pub id: Uuid,
    pub kind: String,
    pub ref_id: String,
    pub reason_category: String,
    pub last_error: String,
    pub first_failed_at: DateTime<Utc>,
    pub attempts: i32,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SearchEventRow {
    pub id: i64,
    pub op: String,
    pub page_id: Uuid,
    pub payload: serde_json::Value,
    pub state: String,
    pub created_at: DateTime<Utc>,
}
