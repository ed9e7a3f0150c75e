use thiserror::Error;

#[derive(Error, Debug)]
pub enum HindsiteError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Queue is at capacity: {0}")]
    QueueFull(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
