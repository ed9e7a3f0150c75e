//! Pipeline job handlers: discovery (scrape_project), extraction
//! (extract_batch), and consistency repair (repair_key), plus the shared
//! dependency wiring and engine registration.

pub mod deps;
pub mod discovery;
pub mod extraction;
pub mod repair;

use std::sync::Arc;

use hindsite_jobs::JobEngine;

pub use deps::PipelineDeps;
pub use discovery::{ScrapeProjectHandler, ScrapeProjectPayload, SCRAPE_PROJECT_JOB};
pub use extraction::{ExtractBatchHandler, ExtractBatchPayload, EXTRACT_BATCH_JOB};
pub use repair::{RepairKeyHandler, RepairKeyPayload};

/// Register every pipeline handler on the engine.
pub fn register_handlers(engine: &mut JobEngine, deps: Arc<PipelineDeps>) {
    engine.register(Arc::new(ScrapeProjectHandler::new(Arc::clone(&deps))));
    engine.register(Arc::new(ExtractBatchHandler::new(Arc::clone(&deps))));
    engine.register(Arc::new(RepairKeyHandler::new(deps)));
}
