//! Archive source plane: strategies for the Wayback Machine and Common Crawl,
//! the policy-driven router with fallback, capture byte fetching, and the
//! per-source metrics the health endpoints read.

pub mod commoncrawl;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod router;
pub mod strategy;
pub mod wayback;

pub use commoncrawl::CommonCrawlStrategy;
pub use error::{SourceError, SourceErrorKind};
pub use fetcher::CaptureFetcher;
pub use metrics::{
    overall_status, source_health, HealthStatus, SourceCounters, SourceHealth, SourceMetrics,
};
pub use router::{
    AttemptDetail, RoutedListing, RouterConfig, RouterError, RouterStats, SourceRouter,
};
pub use strategy::{ArchiveStrategy, CaptureListing, FetchedCapture};
pub use wayback::WaybackStrategy;
