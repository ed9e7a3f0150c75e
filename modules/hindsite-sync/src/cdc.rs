//! Change-data-capture bridge: tails the change feed and emits synthetic
//! dual-write intents for changes that never made it into the outbox (or
//! whose intents were lost to a dead end). Checkpoints are monotone, so a
//! restart resumes where it left off.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use hindsite_store::{IntentInsert, OutboxStore};

#[derive(Debug, Clone)]
pub struct CdcConfig {
    pub consumer_name: String,
    pub batch_size: i64,
    /// Changes younger than this are left alone; the normal outbox path gets
    /// that long to commit them.
    pub grace: Duration,
    pub poll_interval: Duration,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            consumer_name: "cdc-bridge".to_string(),
            batch_size: 200,
            grace: Duration::from_secs(600),
            poll_interval: Duration::from_secs(30),
        }
    }
}

pub struct CdcBridge {
    outbox: OutboxStore,
    config: CdcConfig,
}

impl CdcBridge {
    pub fn new(outbox: OutboxStore, config: CdcConfig) -> Self {
        Self { outbox, config }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(consumer = self.config.consumer_name.as_str(), "CDC bridge starting");
        while !shutdown.is_cancelled() {
            match self.reconcile_once().await {
                Ok(emitted) if emitted > 0 => {
                    info!(emitted, "CDC emitted synthetic intents");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "CDC pass failed"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!("CDC bridge stopped");
    }

    /// One reconciliation pass: read changes past the grace window, emit
    /// synthetic intents for any with no matching intent, advance the
    /// checkpoint. Returns the number of synthetic intents emitted.
    pub async fn reconcile_once(&self) -> anyhow::Result<usize> {
        let checkpoint = self.outbox.checkpoint(&self.config.consumer_name).await?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.grace).unwrap_or(chrono::Duration::zero());
        let changes = self
            .outbox
            .read_changes_from(checkpoint, self.config.batch_size, cutoff)
            .await?;
        if changes.is_empty() {
            return Ok(0);
        }

        let mut emitted = 0usize;
        let mut last_seq = checkpoint;
        for change in &changes {
            last_seq = change.seq;

            let covered = self
                .outbox
                .intent_exists_for(&change.table_name, change.primary_key, &change.payload_hash)
                .await?;
            if covered {
                continue;
            }

            // The change has no intent: emit one. The synchronizer no-ops
            // duplicates through the payload-hash conflict check.
            self.outbox
                .append_standalone(&IntentInsert {
                    op: change.op.clone(),
                    table_name: change.table_name.clone(),
                    primary_key: change.primary_key,
                    payload: change.payload.clone(),
                })
                .await?;
            emitted += 1;
            debug!(
                table = change.table_name.as_str(),
                key = %change.primary_key,
                seq = change.seq,
                "Synthetic intent emitted"
            );
        }

        self.outbox
            .advance_checkpoint(&self.config.consumer_name, last_seq)
            .await?;
        Ok(emitted)
    }
}
