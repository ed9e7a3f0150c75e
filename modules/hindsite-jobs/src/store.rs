//! Postgres-backed job store. Claims use FOR UPDATE SKIP LOCKED so multiple
//! workers never double-claim, and expired leases are recovered on the same
//! path.

use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{EnqueueOptions, JobError, JobRecord, JobState, QueueName};

/// Retry backoff: 2^attempts seconds capped at an hour, plus up to a second
/// of jitter.
fn retry_at(attempts: i32) -> DateTime<Utc> {
    let delay_secs = 2i64.saturating_pow(attempts.max(0) as u32).min(3600);
    let jitter_ms = rand::rng().random_range(0..1000);
    Utc::now()
        + chrono::Duration::seconds(delay_secs)
        + chrono::Duration::milliseconds(jitter_ms)
}

#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
    /// Enqueue refuses beyond this many live jobs per queue.
    queue_capacity: i64,
}

impl JobStore {
    pub fn new(pool: PgPool, queue_capacity: i64) -> Self {
        Self {
            pool,
            queue_capacity,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueue a job. Fails with `QueueFull` when the queue's live set
    /// (enqueued + running) is at capacity.
    pub async fn enqueue(
        &self,
        queue: QueueName,
        job_type: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<Uuid, JobError> {
        let live: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE queue = $1 AND state IN ('enqueued', 'running')
            "#,
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await?;
        if live >= self.queue_capacity {
            return Err(JobError::QueueFull {
                queue,
                capacity: self.queue_capacity,
            });
        }

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs
                (queue, priority, job_type, payload, state, max_attempts,
                 soft_timeout_ms, hard_timeout_ms, parent_id, session_id)
            VALUES ($1, $2, $3, $4, 'enqueued', $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(queue.as_str())
        .bind(opts.priority.unwrap_or_else(|| queue.priority()))
        .bind(job_type)
        .bind(&payload)
        .bind(opts.max_attempts)
        .bind(opts.soft_timeout.as_millis() as i64)
        .bind(opts.hard_timeout.as_millis() as i64)
        .bind(opts.parent_id)
        .bind(opts.session_id)
        .fetch_one(&self.pool)
        .await?;

        info!(job_id = %id, queue = %queue, job_type, "Job enqueued");
        Ok(id)
    }

    /// Claim ready jobs atomically, strict priority then FIFO. Running jobs
    /// with expired leases are reclaimed here too.
    pub async fn claim(
        &self,
        worker_id: &str,
        limit: i64,
        lease_ms: i64,
    ) -> Result<Vec<JobRecord>, JobError> {
        let jobs = sqlx::query_as::<_, JobRecord>(
            r#"
            WITH ready AS (
                SELECT id FROM jobs
                WHERE (state = 'enqueued'
                       AND (next_attempt_at IS NULL OR next_attempt_at <= NOW()))
                   OR (state = 'running' AND lease_expires_at < NOW())
                ORDER BY priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET state = 'running',
                attempts = attempts + 1,
                worker_id = $2,
                lease_expires_at = NOW() + ($3 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM ready)
            RETURNING *
            "#,
        )
        .bind(limit)
        .bind(worker_id)
        .bind(lease_ms.to_string())
        .fetch_all(&self.pool)
        .await?;

        // The CTE's ORDER BY is not preserved by UPDATE ... RETURNING.
        let mut jobs = jobs;
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(jobs)
    }

    pub async fn heartbeat(&self, job_id: Uuid, lease_ms: i64) -> Result<(), JobError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $2 AND state = 'running'
            "#,
        )
        .bind(lease_ms.to_string())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_succeeded(&self, job_id: Uuid) -> Result<(), JobError> {
        sqlx::query(
            r#"
            UPDATE jobs SET state = 'succeeded', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt: reschedule with backoff while attempts and
    /// retriability allow, otherwise dead-letter.
    pub async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        retriable: bool,
    ) -> Result<JobState, JobError> {
        let job = self.get(job_id).await?;

        if retriable && job.attempts < job.max_attempts {
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'enqueued',
                    next_attempt_at = $1,
                    last_error = $2,
                    worker_id = NULL,
                    lease_expires_at = NULL,
                    updated_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(retry_at(job.attempts))
            .bind(error)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            info!(job_id = %job_id, attempts = job.attempts, "Job rescheduled");
            return Ok(JobState::Enqueued);
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'dead', last_error = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO dead_letters (kind, ref_id, reason_category, last_error, attempts, payload)
            VALUES ('job', $1, $2, $3, $4, $5)
            "#,
        )
        .bind(job_id)
        .bind(if retriable { "retries_exhausted" } else { "permanent" })
        .bind(error)
        .bind(job.attempts)
        .bind(&job.payload)
        .execute(&self.pool)
        .await?;

        warn!(job_id = %job_id, error, "Job dead-lettered");
        Ok(JobState::Dead)
    }

    pub async fn mark_cancelled(&self, job_id: Uuid) -> Result<(), JobError> {
        sqlx::query(
            r#"
            UPDATE jobs SET state = 'cancelled', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cooperative cancellation: flags the row; running workers observe the
    /// flag at their next poll, queued jobs are cancelled outright.
    pub async fn request_cancel(&self, job_id: Uuid) -> Result<(), JobError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET cancel_requested = TRUE,
                state = CASE WHEN state = 'enqueued' THEN 'cancelled' ELSE state END,
                updated_at = NOW()
            WHERE id = $1 AND state IN ('enqueued', 'running')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(JobError::NotFound(job_id));
        }
        Ok(())
    }

    pub async fn cancel_requested(&self, job_id: Uuid) -> Result<bool, JobError> {
        let flagged: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flagged.unwrap_or(false))
    }

    /// Progress is monotone in `current`; `total` may grow as discovery
    /// proceeds.
    pub async fn progress(
        &self,
        job_id: Uuid,
        current: i64,
        total: Option<i64>,
        message: Option<&str>,
    ) -> Result<(), JobError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress_current = GREATEST(progress_current, $1),
                progress_total = COALESCE($2, progress_total),
                progress_message = COALESCE($3, progress_message),
                updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(current)
        .bind(total)
        .bind(message)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, job_id: Uuid) -> Result<JobRecord, JobError> {
        sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(JobError::NotFound(job_id))
    }

    /// Live depth of a queue, for backpressure reporting.
    pub async fn queue_depth(&self, queue: QueueName) -> Result<i64, JobError> {
        let depth: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE queue = $1 AND state IN ('enqueued', 'running')
            "#,
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(depth)
    }
}
