//! Dual-write synchronizer: consumes pending intents from the outbox in
//! submission order, applies them to the analytical store, and retries or
//! dead-letters failures.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hindsite_store::OutboxStore;

use crate::analytical::{AnalyticalStore, ApplyOutcome};

#[derive(Debug, Clone)]
pub struct DwsConfig {
    pub consumer_name: String,
    pub batch_size: i64,
    pub max_attempts: i32,
    pub poll_interval: Duration,
    pub claim_lease_secs: i64,
    /// Dead-letter depth that flips the health flag to degraded.
    pub degraded_dlq_threshold: i64,
}

impl Default for DwsConfig {
    fn default() -> Self {
        Self {
            consumer_name: "dws".to_string(),
            batch_size: 100,
            max_attempts: 5,
            poll_interval: Duration::from_secs(2),
            claim_lease_secs: 60,
            degraded_dlq_threshold: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DwsStatus {
    pub committed: u64,
    pub conflicts: u64,
    pub dead_lettered: u64,
    pub pending: i64,
    pub degraded: bool,
}

pub struct DualWriteSynchronizer {
    outbox: OutboxStore,
    analytical: AnalyticalStore,
    config: DwsConfig,
    committed: AtomicU64,
    conflicts: AtomicU64,
    dead_lettered: AtomicU64,
    last_pending: AtomicI64,
}

impl DualWriteSynchronizer {
    pub fn new(outbox: OutboxStore, analytical: AnalyticalStore, config: DwsConfig) -> Self {
        Self {
            outbox,
            analytical,
            config,
            committed: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            last_pending: AtomicI64::new(0),
        }
    }

    pub async fn status(&self) -> DwsStatus {
        let dlq = self.outbox.dead_letter_count().await.unwrap_or(0);
        DwsStatus {
            committed: self.committed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            pending: self.last_pending.load(Ordering::Relaxed),
            degraded: dlq >= self.config.degraded_dlq_threshold,
        }
    }

    /// Worker loop until shutdown. Intents are claimed oldest-first, so
    /// per-key application order follows submission order.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(consumer = self.config.consumer_name.as_str(), "Dual-write synchronizer starting");
        while !shutdown.is_cancelled() {
            let worked = match self.drain_once().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "Synchronizer pass failed");
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
        info!("Dual-write synchronizer stopped");
    }

    /// One claim-and-apply pass. Returns how many intents were processed.
    pub async fn drain_once(&self) -> anyhow::Result<usize> {
        let intents = self
            .outbox
            .claim_pending(
                &self.config.consumer_name,
                self.config.batch_size,
                self.config.claim_lease_secs,
            )
            .await?;
        if intents.is_empty() {
            let pending = self.outbox.pending_count().await.unwrap_or(0);
            self.last_pending.store(pending, Ordering::Relaxed);
            return Ok(0);
        }

        let count = intents.len();
        for intent in intents {
            match self.analytical.apply_intent(&intent).await {
                Ok(ApplyOutcome::Applied | ApplyOutcome::AlreadyCurrent) => {
                    self.outbox.mark_committed(intent.id).await?;
                    self.committed.fetch_add(1, Ordering::Relaxed);
                    debug!(intent_id = intent.id, table = intent.table_name.as_str(), "Intent committed");
                }
                Ok(ApplyOutcome::Conflict) => {
                    // Analytical row is newer; the intent is spent, not retried.
                    self.outbox.mark_committed(intent.id).await?;
                    self.conflicts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        intent_id = intent.id,
                        table = intent.table_name.as_str(),
                        key = %intent.primary_key,
                        "Sync conflict recorded"
                    );
                }
                Err(e) => {
                    let attempts = self.outbox.mark_retry(intent.id).await?;
                    if attempts >= self.config.max_attempts {
                        self.outbox
                            .move_to_dead_letter(&intent, "retries_exhausted", &e.to_string())
                            .await?;
                        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    } else {
                        warn!(
                            intent_id = intent.id,
                            attempts,
                            error = %e,
                            "Intent apply failed, will retry"
                        );
                    }
                }
            }
        }

        let pending = self.outbox.pending_count().await.unwrap_or(0);
        self.last_pending.store(pending, Ordering::Relaxed);
        Ok(count)
    }
}
