use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    /// A strategy produced a result below threshold. Consumed inside the
    /// tiered loop, never surfaced.
    #[error("strategy result below threshold: {0}")]
    SoftFail(String),

    /// A strategy blew up or timed out.
    #[error("strategy failed: {0}")]
    StrategyFailed(String),

    #[error("strategy timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// All tiers exhausted with nothing usable.
    #[error("all extraction strategies failed")]
    ExtractionFailed,
}
