use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Web server
    pub web_host: String,
    pub web_port: u16,

    // Job engine
    pub worker_count: usize,
    pub max_tasks_per_worker: u32,
    pub queue_capacity: i64,

    // Dual-write synchronizer
    /// Global consistency level: strong | eventual | weak.
    pub consistency_level: String,
    pub sync_batch_size: i64,
    pub sync_max_attempts: i32,
    /// Bounded wait for strong-consistency handoff, milliseconds.
    pub strong_sync_wait_ms: u64,

    // CDC
    pub cdc_grace_minutes: i64,

    // Consistency validator
    pub validator_interval_seconds: u64,
    pub validator_sample_size: i64,

    // Extraction
    pub extract_concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("WEB_PORT must be a number"),
            worker_count: parsed_env("WORKER_COUNT", 4),
            max_tasks_per_worker: parsed_env("MAX_TASKS_PER_WORKER", 200),
            queue_capacity: parsed_env("QUEUE_CAPACITY", 10_000),
            consistency_level: env::var("CONSISTENCY_LEVEL")
                .unwrap_or_else(|_| "eventual".to_string()),
            sync_batch_size: parsed_env("SYNC_BATCH_SIZE", 100),
            sync_max_attempts: parsed_env("SYNC_MAX_ATTEMPTS", 5),
            strong_sync_wait_ms: parsed_env("STRONG_SYNC_WAIT_MS", 5_000),
            cdc_grace_minutes: parsed_env("CDC_GRACE_MINUTES", 10),
            validator_interval_seconds: parsed_env("VALIDATOR_INTERVAL_SECONDS", 300),
            validator_sample_size: parsed_env("VALIDATOR_SAMPLE_SIZE", 100),
            extract_concurrency: parsed_env("EXTRACT_CONCURRENCY", 16),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
