//! Outbox plumbing: dual-write intents and change-log entries co-committed
//! with facade writes, plus the consumer-side claim/commit operations the
//! synchronizer and CDC bridge run on.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;
use uuid::Uuid;

use hindsite_common::payload_hash;

use crate::models::{ChangeLogRow, IntentRow};

/// One pending analytical write.
#[derive(Debug, Clone)]
pub struct IntentInsert {
    /// create | update | delete
    pub op: String,
    pub table_name: String,
    pub primary_key: Uuid,
    pub payload: serde_json::Value,
}

/// Append an intent inside the caller's transaction (the outbox pattern: the
/// intent commits or rolls back with the write it mirrors).
pub async fn append_intent(
    tx: &mut Transaction<'_, Postgres>,
    intent: &IntentInsert,
) -> sqlx::Result<i64> {
    let hash = payload_hash(&intent.payload);
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO dual_write_intents (op, table_name, primary_key, payload, payload_hash)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(&intent.op)
    .bind(&intent.table_name)
    .bind(intent.primary_key)
    .bind(&intent.payload)
    .bind(&hash)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

/// Append an intent already in the committed state. The strong-consistency
/// path applies the analytical write before the primary commit and records
/// the intent as done in the same transaction.
pub async fn append_intent_committed(
    tx: &mut Transaction<'_, Postgres>,
    intent: &IntentInsert,
) -> sqlx::Result<i64> {
    let hash = payload_hash(&intent.payload);
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO dual_write_intents
            (op, table_name, primary_key, payload, payload_hash, state, committed_at)
        VALUES ($1, $2, $3, $4, $5, 'committed', NOW())
        RETURNING id
        "#,
    )
    .bind(&intent.op)
    .bind(&intent.table_name)
    .bind(intent.primary_key)
    .bind(&intent.payload)
    .bind(&hash)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

/// Append a change-feed entry for CDC inside the caller's transaction.
pub async fn append_change(
    tx: &mut Transaction<'_, Postgres>,
    table_name: &str,
    primary_key: Uuid,
    op: &str,
    payload: &serde_json::Value,
) -> sqlx::Result<i64> {
    let hash = payload_hash(payload);
    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO change_log (table_name, primary_key, op, payload, payload_hash)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING seq
        "#,
    )
    .bind(table_name)
    .bind(primary_key)
    .bind(op)
    .bind(payload)
    .bind(&hash)
    .fetch_one(&mut **tx)
    .await?;
    Ok(seq)
}

/// Consumer-side operations on the outbox and change feed.
#[derive(Clone)]
pub struct OutboxStore {
    pool: PgPool,
}

impl OutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Claim the oldest pending intents with a row-level lease so concurrent
    /// synchronizer workers never double-apply.
    pub async fn claim_pending(
        &self,
        consumer: &str,
        limit: i64,
        lease_secs: i64,
    ) -> sqlx::Result<Vec<IntentRow>> {
        let rows = sqlx::query_as::<_, IntentRow>(
            r#"
            WITH ready AS (
                SELECT id FROM dual_write_intents
                WHERE state = 'pending'
                  AND (claim_expires_at IS NULL OR claim_expires_at < NOW())
                ORDER BY submitted_at ASC, id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE dual_write_intents
            SET claimed_by = $2,
                claim_expires_at = NOW() + ($3 || ' seconds')::INTERVAL
            WHERE id IN (SELECT id FROM ready)
            RETURNING *
            "#,
        )
        .bind(limit)
        .bind(consumer)
        .bind(lease_secs.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut rows = rows;
        rows.sort_by_key(|r| (r.submitted_at, r.id));
        Ok(rows)
    }

    pub async fn mark_committed(&self, intent_id: i64) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE dual_write_intents
            SET state = 'committed', committed_at = NOW(),
                claimed_by = NULL, claim_expires_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(intent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Release a failed attempt for retry.
    pub async fn mark_retry(&self, intent_id: i64) -> sqlx::Result<i32> {
        let attempts: i32 = sqlx::query_scalar(
            r#"
            UPDATE dual_write_intents
            SET attempts = attempts + 1,
                claimed_by = NULL, claim_expires_at = NULL
            WHERE id = $1
            RETURNING attempts
            "#,
        )
        .bind(intent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts)
    }

    /// Terminal failure: flag the intent and file a dead letter.
    pub async fn move_to_dead_letter(
        &self,
        intent: &IntentRow,
        reason_category: &str,
        error: &str,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE dual_write_intents
            SET state = 'failed', claimed_by = NULL, claim_expires_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(intent.id)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO dead_letters (kind, ref_id, reason_category, last_error, attempts, payload)
            VALUES ('intent', $1, $2, $3, $4, $5)
            "#,
        )
        .bind(intent.id.to_string())
        .bind(reason_category)
        .bind(error)
        .bind(intent.attempts)
        .bind(&intent.payload)
        .execute(&self.pool)
        .await?;

        warn!(
            intent_id = intent.id,
            table = intent.table_name.as_str(),
            error,
            "Intent dead-lettered"
        );
        Ok(())
    }

    /// Has an intent with this payload hash already been committed? CDC
    /// de-duplication.
    pub async fn committed_hash_exists(&self, hash: &str) -> sqlx::Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM dual_write_intents
            WHERE payload_hash = $1 AND state = 'committed'
            LIMIT 1
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Any intent (whatever its state) covering this change? Used by CDC to
    /// decide whether a change was lost.
    pub async fn intent_exists_for(
        &self,
        table_name: &str,
        primary_key: Uuid,
        hash: &str,
    ) -> sqlx::Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM dual_write_intents
            WHERE table_name = $1 AND primary_key = $2 AND payload_hash = $3
            LIMIT 1
            "#,
        )
        .bind(table_name)
        .bind(primary_key)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Insert a synthetic intent outside any facade transaction (CDC path).
    pub async fn append_standalone(&self, intent: &IntentInsert) -> sqlx::Result<i64> {
        let hash = payload_hash(&intent.payload);
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO dual_write_intents (op, table_name, primary_key, payload, payload_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&intent.op)
        .bind(&intent.table_name)
        .bind(intent.primary_key)
        .bind(&intent.payload)
        .bind(&hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get(&self, intent_id: i64) -> sqlx::Result<Option<IntentRow>> {
        sqlx::query_as::<_, IntentRow>("SELECT * FROM dual_write_intents WHERE id = $1")
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn pending_count(&self) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM dual_write_intents WHERE state = 'pending'")
            .fetch_one(&self.pool)
            .await
    }

    pub async fn dead_letter_count(&self) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await
    }

    // --- change feed ---

    pub async fn read_changes_from(
        &self,
        seq_start: i64,
        limit: i64,
        older_than: DateTime<Utc>,
    ) -> sqlx::Result<Vec<ChangeLogRow>> {
        sqlx::query_as::<_, ChangeLogRow>(
            r#"
            SELECT * FROM change_log
            WHERE seq > $1 AND changed_at < $2
            ORDER BY seq ASC
            LIMIT $3
            "#,
        )
        .bind(seq_start)
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn checkpoint(&self, consumer: &str) -> sqlx::Result<i64> {
        let seq: Option<i64> =
            sqlx::query_scalar("SELECT last_seq FROM cdc_checkpoints WHERE consumer = $1")
                .bind(consumer)
                .fetch_optional(&self.pool)
                .await?;
        Ok(seq.unwrap_or(0))
    }

    /// Checkpoints only move forward.
    pub async fn advance_checkpoint(&self, consumer: &str, seq: i64) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cdc_checkpoints (consumer, last_seq, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (consumer)
            DO UPDATE SET last_seq = GREATEST(cdc_checkpoints.last_seq, $2), updated_at = NOW()
            "#,
        )
        .bind(consumer)
        .bind(seq)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
