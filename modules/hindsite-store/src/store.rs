//! Read-side queries and project/target CRUD. The facade owns the
//! invariant-enforcing writes; everything here is lookups, listings, and
//! boring inserts.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use hindsite_common::{ArchivePolicy, ConsistencyLevel};
use hindsite_filter::{PageLookup, ProcessedPage};

use crate::facade::StoreError;
use crate::models::{
    DeadLetterRow, PageRow, ProjectRow, ScrapePageRow, SessionRow, TargetRow,
};

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

/// Filters for the scrape-page browsing endpoint. All optional and additive.
#[derive(Debug, Clone, Default)]
pub struct ScrapePageQuery {
    pub statuses: Vec<String>,
    pub filter_categories: Vec<String>,
    pub is_manually_overridden: Option<bool>,
    pub priority_min: Option<i32>,
    pub priority_max: Option<i32>,
    /// Substring match on the original URL.
    pub search: Option<String>,
    pub session_id: Option<Uuid>,
    pub has_errors: Option<bool>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub show_only_processable: bool,
    /// Keyset cursor from the previous page.
    pub cursor: Option<PageCursor>,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl PageCursor {
    pub fn encode(&self) -> String {
        format!("{}|{}", self.created_at.to_rfc3339(), self.id)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let (ts, id) = raw.split_once('|')?;
        Some(Self {
            created_at: DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc),
            id: id.parse().ok()?,
        })
    }
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Projects and targets
    // -----------------------------------------------------------------------

    pub async fn create_project(
        &self,
        name: &str,
        description: &str,
        policy: &ArchivePolicy,
        filter_config: &serde_json::Value,
        consistency: ConsistencyLevel,
    ) -> Result<ProjectRow, StoreError> {
        let row: ProjectRow = sqlx::query_as(
            r#"
            INSERT INTO projects (name, description, archive_policy, filter_config, consistency_level)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(serde_json::to_value(policy).unwrap_or_default())
        .bind(filter_config)
        .bind(consistency.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn update_project_policy(
        &self,
        project_id: Uuid,
        policy: &ArchivePolicy,
    ) -> Result<ProjectRow, StoreError> {
        sqlx::query_as(
            r#"
            UPDATE projects
            SET archive_policy = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(serde_json::to_value(policy).unwrap_or_default())
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("project", project_id.to_string()))
    }

    pub async fn get_project(&self, project_id: Uuid) -> Result<ProjectRow, StoreError> {
        sqlx::query_as("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("project", project_id.to_string()))
    }

    pub fn parse_policy(project: &ProjectRow) -> ArchivePolicy {
        serde_json::from_value(project.archive_policy.clone()).unwrap_or_default()
    }

    pub async fn add_target(
        &self,
        project_id: Uuid,
        domain: &str,
        match_type: &str,
        url_path: Option<&str>,
        from_date: NaiveDate,
        to_date: NaiveDate,
        include_attachments: bool,
    ) -> Result<TargetRow, StoreError> {
        let row: TargetRow = sqlx::query_as(
            r#"
            INSERT INTO targets
                (project_id, domain, match_type, url_path, from_date, to_date, include_attachments)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(domain)
        .bind(match_type)
        .bind(url_path)
        .bind(from_date)
        .bind(to_date)
        .bind(include_attachments)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn targets_for_project(&self, project_id: Uuid) -> Result<Vec<TargetRow>, StoreError> {
        let rows = sqlx::query_as::<_, TargetRow>(
            "SELECT * FROM targets WHERE project_id = $1 ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Scrape pages
    // -----------------------------------------------------------------------

    pub async fn get_scrape_page(&self, id: Uuid) -> Result<ScrapePageRow, StoreError> {
        sqlx::query_as("SELECT * FROM scrape_pages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("scrape page", id.to_string()))
    }

    /// Browse a project's scrape pages with filters and keyset pagination.
    /// Ordered by (created_at, id) ascending; the cursor points past the last
    /// row returned.
    pub async fn list_scrape_pages(
        &self,
        project_id: Uuid,
        query: &ScrapePageQuery,
    ) -> Result<Vec<ScrapePageRow>, StoreError> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            r#"
            SELECT sp.* FROM scrape_pages sp
            JOIN targets t ON t.id = sp.target_id
            WHERE t.project_id =
            "#,
        );
        builder.push_bind(project_id);

        if !query.statuses.is_empty() {
            builder.push(" AND sp.status = ANY(");
            builder.push_bind(query.statuses.clone());
            builder.push(")");
        }
        if !query.filter_categories.is_empty() {
            builder.push(" AND sp.filter_category = ANY(");
            builder.push_bind(query.filter_categories.clone());
            builder.push(")");
        }
        if let Some(overridden) = query.is_manually_overridden {
            builder.push(" AND sp.is_manually_overridden = ");
            builder.push_bind(overridden);
        }
        if let Some(min) = query.priority_min {
            builder.push(" AND sp.priority_score >= ");
            builder.push_bind(min);
        }
        if let Some(max) = query.priority_max {
            builder.push(" AND sp.priority_score <= ");
            builder.push_bind(max);
        }
        if let Some(search) = &query.search {
            builder.push(" AND sp.original_url ILIKE ");
            builder.push_bind(format!("%{}%", search.replace('%', "\\%")));
        }
        if let Some(session_id) = query.session_id {
            builder.push(" AND sp.session_id = ");
            builder.push_bind(session_id);
        }
        if let Some(has_errors) = query.has_errors {
            if has_errors {
                builder.push(" AND sp.last_error IS NOT NULL");
            } else {
                builder.push(" AND sp.last_error IS NULL");
            }
        }
        if let Some(from) = query.date_from {
            builder.push(" AND sp.created_at >= ");
            builder.push_bind(from);
        }
        if let Some(to) = query.date_to {
            builder.push(" AND sp.created_at <= ");
            builder.push_bind(to);
        }
        if query.show_only_processable {
            builder.push(" AND sp.can_be_manually_processed = TRUE");
        }
        if let Some(cursor) = &query.cursor {
            builder.push(" AND (sp.created_at, sp.id) > (");
            builder.push_bind(cursor.created_at);
            builder.push(", ");
            builder.push_bind(cursor.id);
            builder.push(")");
        }

        builder.push(" ORDER BY sp.created_at ASC, sp.id ASC LIMIT ");
        builder.push_bind(query.limit.clamp(1, 500));

        let rows = builder
            .build_query_as::<ScrapePageRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Pending captures of a session in deterministic processing order.
    pub async fn pending_for_session(
        &self,
        session_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ScrapePageRow>, StoreError> {
        let rows = sqlx::query_as::<_, ScrapePageRow>(
            r#"
            SELECT * FROM scrape_pages
            WHERE session_id = $1 AND status = 'pending'
            ORDER BY original_url ASC, capture_timestamp ASC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_page(&self, id: Uuid) -> Result<PageRow, StoreError> {
        sqlx::query_as("SELECT * FROM pages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("page", id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub async fn get_session(&self, id: Uuid) -> Result<SessionRow, StoreError> {
        sqlx::query_as("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("session", id.to_string()))
    }

    pub async fn sessions_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<SessionRow>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE project_id = $1 ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetterRow>, StoreError> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            "SELECT * FROM dead_letters ORDER BY first_failed_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Duplicate lookup used by the filter: content counts as processed when a
/// completed scrape page with the same source digest is linked to a page in
/// the same project.
#[async_trait]
impl PageLookup for Store {
    async fn find_processed(
        &self,
        project_id: Uuid,
        digest: &str,
    ) -> anyhow::Result<Option<ProcessedPage>> {
        let row: Option<(Uuid, Uuid, String)> = sqlx::query_as(
            r#"
            SELECT sp.related_page_id, t.project_id, sp.capture_timestamp
            FROM scrape_pages sp
            JOIN targets t ON t.id = sp.target_id
            WHERE t.project_id = $1
              AND sp.digest = $2
              AND sp.status = 'completed'
              AND sp.related_page_id IS NOT NULL
            ORDER BY sp.capture_timestamp ASC
            LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(page_id, project_id, capture_timestamp)| ProcessedPage {
            page_id,
            project_id,
            capture_timestamp: Some(capture_timestamp),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let cursor = PageCursor {
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        };
        let decoded = PageCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded.id, cursor.id);
        assert_eq!(
            decoded.created_at.timestamp_micros(),
            cursor.created_at.timestamp_micros()
        );
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(PageCursor::decode("not-a-cursor").is_none());
        assert!(PageCursor::decode("2024-01-01T00:00:00Z|nope").is_none());
    }
}
