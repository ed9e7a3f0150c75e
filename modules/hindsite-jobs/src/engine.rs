//! Worker pool and handler dispatch. Workers claim jobs in strict priority
//! order, run handlers under soft/hard timeouts with heartbeats and a
//! cancellation watcher, and are recycled after a task budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::store::JobStore;
use crate::types::{JobFailure, JobRecord};

/// Everything a handler gets for one run.
pub struct JobContext {
    pub job_id: Uuid,
    pub payload: serde_json::Value,
    pub attempt: i32,
    pub session_id: Option<Uuid>,
    /// Cancelled on shutdown, cancel request, or soft timeout. Handlers check
    /// this at every suspension point.
    pub cancel: CancellationToken,
    store: JobStore,
}

impl JobContext {
    /// Report progress; `current` is monotone, `total` may grow.
    pub async fn progress(&self, current: i64, total: Option<i64>, message: Option<&str>) {
        if let Err(e) = self.store.progress(self.job_id, current, total, message).await {
            warn!(job_id = %self.job_id, error = %e, "Failed to record progress");
        }
    }

    /// Cancellation checkpoint for loops between items.
    pub fn checkpoint(&self) -> Result<(), JobFailure> {
        if self.cancel.is_cancelled() {
            return Err(JobFailure::Cancelled);
        }
        Ok(())
    }

    /// Store handle for handlers that enqueue follow-up jobs.
    pub fn store(&self) -> &JobStore {
        &self.store
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn run(&self, ctx: JobContext) -> Result<(), JobFailure>;
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size.
    pub worker_count: usize,
    /// Tasks a worker runs before being recycled.
    pub max_tasks_per_worker: u32,
    /// Sleep when the queues are empty.
    pub poll_interval: Duration,
    /// Cancellation flag poll cadence (the 250 ms observation contract).
    pub cancel_poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub lease_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_tasks_per_worker: 200,
            poll_interval: Duration::from_secs(2),
            cancel_poll_interval: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(15),
            lease_ms: 60_000,
        }
    }
}

pub struct JobEngine {
    store: JobStore,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    config: EngineConfig,
}

impl JobEngine {
    pub fn new(store: JobStore, config: EngineConfig) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            config,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type().to_string(), handler);
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Spawn the worker pool. Each slot supervises a worker and replaces it
    /// when it hits its task budget (memory hygiene) until shutdown.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.config.worker_count)
            .map(|slot| {
                let engine = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let mut generation = 0u32;
                    while !shutdown.is_cancelled() {
                        let worker_id = format!("worker-{slot}-{generation}");
                        info!(worker_id = worker_id.as_str(), "Worker starting");
                        engine.worker_loop(&worker_id, &shutdown).await;
                        generation += 1;
                    }
                    info!(slot, "Worker slot stopped");
                })
            })
            .collect()
    }

    /// One worker generation: claim and run jobs until the task budget is
    /// spent or shutdown is requested.
    async fn worker_loop(&self, worker_id: &str, shutdown: &CancellationToken) {
        let mut tasks_done = 0u32;
        while !shutdown.is_cancelled() && tasks_done < self.config.max_tasks_per_worker {
            let claimed = match self.store.claim(worker_id, 1, self.config.lease_ms).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "Failed to claim jobs");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let Some(job) = claimed.into_iter().next() else {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            };

            self.process_job(job, shutdown).await;
            tasks_done += 1;
        }
        debug!(worker_id, tasks_done, "Worker recycling");
    }

    async fn process_job(&self, job: JobRecord, shutdown: &CancellationToken) {
        let job_id = job.id;
        let Some(handler) = self.handlers.get(&job.job_type) else {
            error!(job_id = %job_id, job_type = job.job_type.as_str(), "No handler registered");
            let _ = self
                .store
                .mark_failed(job_id, &format!("no handler for {}", job.job_type), false)
                .await;
            return;
        };

        let job_cancel = shutdown.child_token();
        let watcher = self.spawn_watcher(job_id, job_cancel.clone());

        let ctx = JobContext {
            job_id,
            payload: job.payload.clone(),
            attempt: job.attempts,
            session_id: job.session_id,
            cancel: job_cancel.clone(),
            store: self.store.clone(),
        };

        let soft = Duration::from_millis(job.soft_timeout_ms.max(0) as u64);
        let hard = Duration::from_millis(job.hard_timeout_ms.max(0) as u64);
        let outcome = self.run_with_timeouts(handler.as_ref(), ctx, soft, hard).await;

        watcher.abort();

        let cancelled_by_request = match self.store.cancel_requested(job_id).await {
            Ok(flag) => flag,
            Err(_) => false,
        };

        match outcome {
            RunOutcome::Ok => {
                debug!(job_id = %job_id, "Job succeeded");
                if let Err(e) = self.store.mark_succeeded(job_id).await {
                    error!(job_id = %job_id, error = %e, "Failed to mark success");
                }
            }
            RunOutcome::Failed(JobFailure::Cancelled) => {
                info!(job_id = %job_id, "Job cancelled");
                let _ = self.store.mark_cancelled(job_id).await;
            }
            RunOutcome::Failed(JobFailure::Retriable(e)) => {
                // Shutdown-driven cancellation re-runs later; an explicit
                // cancel request ends the job.
                if cancelled_by_request {
                    let _ = self.store.mark_cancelled(job_id).await;
                } else {
                    warn!(job_id = %job_id, error = %e, "Job failed, may retry");
                    let _ = self.store.mark_failed(job_id, &e.to_string(), true).await;
                }
            }
            RunOutcome::Failed(JobFailure::Permanent(e)) => {
                warn!(job_id = %job_id, error = %e, "Job failed permanently");
                let _ = self.store.mark_failed(job_id, &e.to_string(), false).await;
            }
            RunOutcome::SoftTimeout => {
                if cancelled_by_request {
                    let _ = self.store.mark_cancelled(job_id).await;
                } else {
                    warn!(job_id = %job_id, "Job hit soft timeout");
                    let _ = self.store.mark_failed(job_id, "soft timeout", true).await;
                }
            }
            RunOutcome::HardTimeout => {
                error!(job_id = %job_id, "Job hit hard timeout, aborted");
                let _ = self.store.mark_failed(job_id, "timeout", false).await;
            }
        }
    }

    /// Heartbeats the lease and polls the cancel flag on one interval task.
    fn spawn_watcher(&self, job_id: Uuid, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.store.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        let cancel_poll = self.config.cancel_poll_interval;
        let lease_ms = self.config.lease_ms;
        tokio::spawn(async move {
            let mut since_heartbeat = Duration::ZERO;
            loop {
                tokio::time::sleep(cancel_poll).await;
                since_heartbeat += cancel_poll;

                match store.cancel_requested(job_id).await {
                    Ok(true) => {
                        cancel.cancel();
                        return;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(job_id = %job_id, error = %e, "Cancel poll failed"),
                }

                if since_heartbeat >= heartbeat_interval {
                    since_heartbeat = Duration::ZERO;
                    if let Err(e) = store.heartbeat(job_id, lease_ms).await {
                        warn!(job_id = %job_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        })
    }

    /// Soft timeout cancels the job's token and grants a grace window until
    /// the hard deadline; the hard timeout drops the task outright.
    async fn run_with_timeouts(
        &self,
        handler: &dyn JobHandler,
        ctx: JobContext,
        soft: Duration,
        hard: Duration,
    ) -> RunOutcome {
        let cancel = ctx.cancel.clone();
        let fut = handler.run(ctx);
        tokio::pin!(fut);

        tokio::select! {
            result = &mut fut => to_outcome(result),
            _ = tokio::time::sleep(soft) => {
                cancel.cancel();
                let grace = hard.saturating_sub(soft);
                match tokio::time::timeout(grace, &mut fut).await {
                    Ok(result) => match to_outcome(result) {
                        // Unwound after the soft deadline: still a timeout.
                        RunOutcome::Ok | RunOutcome::Failed(JobFailure::Cancelled) => {
                            RunOutcome::SoftTimeout
                        }
                        other => other,
                    },
                    Err(_) => RunOutcome::HardTimeout,
                }
            }
        }
    }
}

enum RunOutcome {
    Ok,
    Failed(JobFailure),
    SoftTimeout,
    HardTimeout,
}

fn to_outcome(result: Result<(), JobFailure>) -> RunOutcome {
    match result {
        Ok(()) => RunOutcome::Ok,
        Err(e) => RunOutcome::Failed(e),
    }
}
