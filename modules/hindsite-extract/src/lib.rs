//! Tiered content extraction: readability, article heuristics, and whole-DOM
//! text, in declared quality order with per-tier circuit breakers, plus the
//! quality scoring stored on materialized pages.

pub mod article;
pub mod dom;
pub mod error;
pub mod language;
pub mod quality;
pub mod readability;
pub mod soup;
pub mod strategy;
pub mod tiered;

pub use error::ExtractError;
pub use quality::{quality_score, simhash, RecentHashes};
pub use strategy::{ExtractionResult, ExtractionStrategy};
pub use tiered::{finalize, ExtractorConfig, TieredExtractor, TieredOutcome};
