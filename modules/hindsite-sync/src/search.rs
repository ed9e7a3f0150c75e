//! Search-index outbox pump. The indexing service itself is external; this
//! side only guarantees at-least-once delivery of upsert/delete events, so
//! the sink must be idempotent on (page_id, content_digest).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hindsite_store::SearchEventRow;

/// The external search sink contract.
#[async_trait]
pub trait SearchSink: Send + Sync {
    async fn upsert(&self, payload: &serde_json::Value) -> anyhow::Result<()>;
    async fn delete(&self, page_id: uuid::Uuid) -> anyhow::Result<()>;
}

/// Default sink: logs events instead of shipping them. Lets the pipeline run
/// end to end with no indexing service attached.
pub struct LogSink;

#[async_trait]
impl SearchSink for LogSink {
    async fn upsert(&self, payload: &serde_json::Value) -> anyhow::Result<()> {
        debug!(
            page_id = payload.get("page_id").and_then(|v| v.as_str()).unwrap_or(""),
            "Search upsert event (no sink configured)"
        );
        Ok(())
    }

    async fn delete(&self, page_id: uuid::Uuid) -> anyhow::Result<()> {
        debug!(page_id = %page_id, "Search delete event (no sink configured)");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SearchPumpConfig {
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub max_attempts: i32,
}

impl Default for SearchPumpConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

/// Drains search_index_events to the sink in id order.
pub struct SearchIndexPump {
    pool: PgPool,
    sink: Arc<dyn SearchSink>,
    config: SearchPumpConfig,
}

impl SearchIndexPump {
    pub fn new(pool: PgPool, sink: Arc<dyn SearchSink>, config: SearchPumpConfig) -> Self {
        Self { pool, sink, config }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Search index pump starting");
        while !shutdown.is_cancelled() {
            let worked = match self.drain_once().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "Search pump pass failed");
                    0
                }
            };
            if worked == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
        info!("Search index pump stopped");
    }

    pub async fn drain_once(&self) -> anyhow::Result<usize> {
        let events = sqlx::query_as::<_, SearchEventRow>(
            r#"
            SELECT * FROM search_index_events
            WHERE state = 'pending'
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(self.config.batch_size)
        .fetch_all(&self.pool)
        .await?;
        if events.is_empty() {
            return Ok(0);
        }

        let count = events.len();
        for event in events {
            let delivered = match event.op.as_str() {
                "upsert" => self.sink.upsert(&event.payload).await,
                "delete" => self.sink.delete(event.page_id).await,
                other => {
                    warn!(op = other, id = event.id, "Unknown search event op");
                    Ok(())
                }
            };
            match delivered {
                Ok(()) => {
                    sqlx::query("UPDATE search_index_events SET state = 'sent' WHERE id = $1")
                        .bind(event.id)
                        .execute(&self.pool)
                        .await?;
                }
                Err(e) => {
                    warn!(id = event.id, error = %e, "Search event delivery failed");
                    // Delivery is at-least-once: the row stays pending and is
                    // retried on the next pass.
                }
            }
        }
        Ok(count)
    }
}
