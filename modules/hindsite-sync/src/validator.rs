//! Consistency validator: periodic row-count, hash-sample, and referential
//! checks between the transactional and analytical stores, with repair jobs
//! for what it finds.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use hindsite_jobs::{EnqueueOptions, JobStore, QueueName};
use hindsite_store::OutboxStore;

pub const REPAIR_JOB_TYPE: &str = "repair_key";

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub interval: Duration,
    /// Primary keys sampled per table for the hash check.
    pub sample_size: i64,
    /// When the dead-letter queue is at least this deep, sampling shrinks to
    /// a quarter so validation doesn't amplify the load.
    pub reduce_sampling_dlq: i64,
    /// Keyed discrepancies at or above this count trigger repair enqueue.
    pub repair_severity: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            sample_size: 100,
            reduce_sampling_dlq: 100,
            repair_severity: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    MissingInAnalytical,
    ExtraInAnalytical,
    HashMismatch,
    DanglingRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct Discrepancy {
    pub table: String,
    pub key: Uuid,
    pub kind: DiscrepancyKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// 0–100; 100 means every check passed.
    pub consistency_score: u8,
    pub checks_run: u64,
    pub row_count_transactional: i64,
    pub row_count_analytical: i64,
    pub discrepancies: Vec<Discrepancy>,
}

pub struct ConsistencyValidator {
    pool: PgPool,
    outbox: OutboxStore,
    jobs: JobStore,
    config: ValidatorConfig,
    last_report: tokio::sync::Mutex<Option<ValidationReport>>,
}

impl ConsistencyValidator {
    pub fn new(pool: PgPool, outbox: OutboxStore, jobs: JobStore, config: ValidatorConfig) -> Self {
        Self {
            pool,
            outbox,
            jobs,
            config,
            last_report: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn last_report(&self) -> Option<ValidationReport> {
        self.last_report.lock().await.clone()
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Consistency validator starting");
        while !shutdown.is_cancelled() {
            match self.validate_once().await {
                Ok(report) => {
                    if report.consistency_score < 100 {
                        warn!(
                            score = report.consistency_score,
                            discrepancies = report.discrepancies.len(),
                            "Consistency check found drift"
                        );
                    }
                    *self.last_report.lock().await = Some(report);
                }
                Err(e) => error!(error = %e, "Consistency check failed"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
        info!("Consistency validator stopped");
    }

    /// One full validation pass over both monitored tables plus referential
    /// checks. Repair jobs are enqueued for keyed discrepancies.
    pub async fn validate_once(&self) -> anyhow::Result<ValidationReport> {
        let sample = self.effective_sample_size().await;
        let mut discrepancies = Vec::new();
        let mut checks_run = 0u64;

        // Row counts, for the report and the score.
        let tx_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scrape_pages")
            .fetch_one(&self.pool)
            .await?;
        let an_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analytics.scrape_pages")
            .fetch_one(&self.pool)
            .await?;
        checks_run += 1;
        let counts_match = tx_count == an_count;

        // Missing in analytical (sampled from the transactional side).
        let missing: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT sp.id FROM scrape_pages sp
            LEFT JOIN analytics.scrape_pages a ON a.id = sp.id
            WHERE a.id IS NULL
            LIMIT $1
            "#,
        )
        .bind(sample)
        .fetch_all(&self.pool)
        .await?;
        checks_run += missing.len() as u64;
        discrepancies.extend(missing.into_iter().map(|key| Discrepancy {
            table: "scrape_pages".into(),
            key,
            kind: DiscrepancyKind::MissingInAnalytical,
        }));

        // Extra in analytical.
        let extra: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT a.id FROM analytics.scrape_pages a
            LEFT JOIN scrape_pages sp ON sp.id = a.id
            WHERE sp.id IS NULL
            LIMIT $1
            "#,
        )
        .bind(sample)
        .fetch_all(&self.pool)
        .await?;
        checks_run += extra.len() as u64;
        discrepancies.extend(extra.into_iter().map(|key| Discrepancy {
            table: "scrape_pages".into(),
            key,
            kind: DiscrepancyKind::ExtraInAnalytical,
        }));

        // Hash check over a random sample: canonical columns must agree.
        let mismatched: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT sp.id FROM (
                SELECT * FROM scrape_pages ORDER BY random() LIMIT $1
            ) sp
            JOIN analytics.scrape_pages a ON a.id = sp.id
            WHERE a.status <> sp.status
               OR a.original_url <> sp.original_url
               OR a.capture_timestamp <> sp.capture_timestamp
            "#,
        )
        .bind(sample)
        .fetch_all(&self.pool)
        .await?;
        checks_run += sample as u64;
        discrepancies.extend(mismatched.into_iter().map(|key| Discrepancy {
            table: "scrape_pages".into(),
            key,
            kind: DiscrepancyKind::HashMismatch,
        }));

        // Pages: missing rows.
        let missing_pages: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT p.id FROM pages p
            LEFT JOIN analytics.pages a ON a.id = p.id
            WHERE a.id IS NULL
            LIMIT $1
            "#,
        )
        .bind(sample)
        .fetch_all(&self.pool)
        .await?;
        checks_run += missing_pages.len() as u64;
        discrepancies.extend(missing_pages.into_iter().map(|key| Discrepancy {
            table: "pages".into(),
            key,
            kind: DiscrepancyKind::MissingInAnalytical,
        }));

        // Referential: every related_page_id resolves in both stores.
        let dangling: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT sp.id FROM scrape_pages sp
            LEFT JOIN pages p ON p.id = sp.related_page_id
            LEFT JOIN analytics.pages ap ON ap.id = sp.related_page_id
            WHERE sp.related_page_id IS NOT NULL
              AND (p.id IS NULL OR ap.id IS NULL)
            LIMIT $1
            "#,
        )
        .bind(sample)
        .fetch_all(&self.pool)
        .await?;
        checks_run += dangling.len() as u64;
        discrepancies.extend(dangling.into_iter().map(|key| Discrepancy {
            table: "scrape_pages".into(),
            key,
            kind: DiscrepancyKind::DanglingRef,
        }));

        let penalty = discrepancies.len() as f64 + if counts_match { 0.0 } else { 1.0 };
        let score = if checks_run == 0 {
            100.0
        } else {
            100.0 * (1.0 - (penalty / checks_run as f64)).max(0.0)
        };

        let report = ValidationReport {
            consistency_score: score.round() as u8,
            checks_run,
            row_count_transactional: tx_count,
            row_count_analytical: an_count,
            discrepancies,
        };

        if report.discrepancies.len() >= self.config.repair_severity {
            self.enqueue_repairs(&report).await;
        }

        Ok(report)
    }

    /// Shrink sampling while the dead-letter queue is deep.
    async fn effective_sample_size(&self) -> i64 {
        let dlq = self.outbox.dead_letter_count().await.unwrap_or(0);
        if dlq >= self.config.reduce_sampling_dlq {
            (self.config.sample_size / 4).max(10)
        } else {
            self.config.sample_size
        }
    }

    async fn enqueue_repairs(&self, report: &ValidationReport) {
        for discrepancy in &report.discrepancies {
            let payload = serde_json::json!({
                "table": discrepancy.table,
                "key": discrepancy.key,
                "kind": discrepancy.kind,
            });
            match self
                .jobs
                .enqueue(
                    QueueName::Indexing,
                    REPAIR_JOB_TYPE,
                    payload,
                    EnqueueOptions::default(),
                )
                .await
            {
                Ok(job_id) => {
                    info!(job_id = %job_id, key = %discrepancy.key, "Repair job enqueued")
                }
                Err(e) => warn!(key = %discrepancy.key, error = %e, "Repair enqueue failed"),
            }
        }
    }
}
