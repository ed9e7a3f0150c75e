//! Job engine: named priority queues over Postgres, a recycled worker pool,
//! retries with backoff, dead-lettering, progress, and cooperative
//! cancellation.

pub mod engine;
pub mod store;
pub mod types;

pub use engine::{EngineConfig, JobContext, JobEngine, JobHandler};
pub use store::JobStore;
pub use types::{EnqueueOptions, JobError, JobFailure, JobRecord, JobState, QueueName};
