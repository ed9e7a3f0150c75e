//! Shared dependencies for the pipeline job handlers.

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

use hindsite_extract::{RecentHashes, TieredExtractor};
use hindsite_filter::CaptureFilter;
use hindsite_sources::{CaptureFetcher, SourceRouter};
use hindsite_store::{PersistenceFacade, Store};

/// Everything a handler needs, wired once at startup.
pub struct PipelineDeps {
    pub store: Store,
    pub facade: PersistenceFacade,
    pub router: Arc<SourceRouter>,
    pub fetcher: Arc<CaptureFetcher>,
    pub extractor: Arc<TieredExtractor>,
    pub filter: Arc<CaptureFilter>,
    /// Global extraction concurrency bound; keeps parser memory in check.
    pub extract_limit: Arc<Semaphore>,
    /// Recent-page simhash ring for the uniqueness component.
    pub recent_hashes: Arc<Mutex<RecentHashes>>,
    /// Captures per extract_batch job.
    pub extract_batch_size: usize,
}

impl PipelineDeps {
    pub fn new(
        store: Store,
        facade: PersistenceFacade,
        router: Arc<SourceRouter>,
        extractor: Arc<TieredExtractor>,
        extract_concurrency: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            facade,
            fetcher: Arc::new(CaptureFetcher::new(Arc::clone(&router))),
            router,
            extractor,
            filter: Arc::new(CaptureFilter::new()),
            extract_limit: Arc::new(Semaphore::new(extract_concurrency.max(1))),
            recent_hashes: Arc::new(Mutex::new(RecentHashes::new(512))),
            extract_batch_size: 50,
        })
    }
}
