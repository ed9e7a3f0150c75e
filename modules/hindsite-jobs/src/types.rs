use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Named queues with fixed scheduling priority. Higher runs first; ties break
/// FIFO by enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Quick,
    Scraping,
    Indexing,
    Default,
}

impl QueueName {
    pub fn priority(&self) -> i32 {
        match self {
            QueueName::Quick => 9,
            QueueName::Scraping => 5,
            QueueName::Indexing => 3,
            QueueName::Default => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Quick => "quick",
            QueueName::Scraping => "scraping",
            QueueName::Indexing => "indexing",
            QueueName::Default => "default",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(Self::Quick),
            "scraping" => Ok(Self::Scraping),
            "indexing" => Ok(Self::Indexing),
            "default" => Ok(Self::Default),
            other => Err(format!("unknown QueueName: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Enqueued,
    Running,
    Succeeded,
    Failed,
    Dead,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Enqueued => "enqueued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enqueued" => Ok(Self::Enqueued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown JobState: {other}")),
        }
    }
}

/// A row from the jobs table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRecord {
    pub id: Uuid,
    pub queue: String,
    pub priority: i32,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub soft_timeout_ms: i64,
    pub hard_timeout_ms: i64,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub parent_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub progress_current: i64,
    pub progress_total: Option<i64>,
    pub progress_message: Option<String>,
    pub last_error: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything `enqueue` accepts beyond queue + type + payload.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Override the queue's default priority.
    pub priority: Option<i32>,
    pub max_attempts: i32,
    pub soft_timeout: std::time::Duration,
    pub hard_timeout: std::time::Duration,
    pub parent_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: None,
            max_attempts: 3,
            soft_timeout: std::time::Duration::from_secs(300),
            hard_timeout: std::time::Duration::from_secs(900),
            parent_id: None,
            session_id: None,
        }
    }
}

/// How a handler run ended, when it didn't end well.
#[derive(Error, Debug)]
pub enum JobFailure {
    /// Worth another attempt, with backoff.
    #[error("retriable: {0}")]
    Retriable(#[source] anyhow::Error),

    /// Straight to the dead-letter store.
    #[error("permanent: {0}")]
    Permanent(#[source] anyhow::Error),

    /// Cooperative cancellation observed.
    #[error("cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("queue {queue} is at capacity ({capacity})")]
    QueueFull { queue: QueueName, capacity: i64 },

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_priorities() {
        assert_eq!(QueueName::Quick.priority(), 9);
        assert_eq!(QueueName::Scraping.priority(), 5);
        assert_eq!(QueueName::Indexing.priority(), 3);
        assert_eq!(QueueName::Default.priority(), 5);
    }

    #[test]
    fn queue_round_trip() {
        for q in [
            QueueName::Quick,
            QueueName::Scraping,
            QueueName::Indexing,
            QueueName::Default,
        ] {
            assert_eq!(q.as_str().parse::<QueueName>().unwrap(), q);
        }
    }
}
