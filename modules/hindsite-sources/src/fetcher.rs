//! Capture byte fetcher: prefers the source that listed the capture, walks
//! the policy order when the preferred source reports it missing.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hindsite_common::{ArchivePolicy, ArchiveSource, CaptureRecord};

use crate::error::SourceError;
use crate::router::SourceRouter;
use crate::strategy::FetchedCapture;

pub struct CaptureFetcher {
    router: Arc<SourceRouter>,
}

impl CaptureFetcher {
    pub fn new(router: Arc<SourceRouter>) -> Self {
        Self { router }
    }

    /// Fetch the archived bytes behind a capture. The originating source goes
    /// first; on `NotCaptured` (or a breaker rejection) the remaining enabled
    /// sources are tried in policy order.
    pub async fn fetch(
        &self,
        policy: &ArchivePolicy,
        record: &CaptureRecord,
        originating: ArchiveSource,
        cancel: &CancellationToken,
    ) -> Result<FetchedCapture, SourceError> {
        let mut order: Vec<ArchiveSource> = vec![originating];
        for strategy in self.router.resolve_order(policy) {
            let source = strategy.source();
            if !order.contains(&source) {
                order.push(source);
            }
        }

        let mut last_err = SourceError::NotCaptured;
        for source in order {
            let Some(strategy) = self.router.strategy(source) else {
                continue;
            };
            if !policy.source_config(source).enabled {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            match strategy.fetch_capture(record, cancel).await {
                Ok(fetched) => {
                    debug!(
                        url = %record.original_url,
                        source = %source,
                        bytes = fetched.bytes.len(),
                        "Capture fetched"
                    );
                    return Ok(fetched);
                }
                Err(SourceError::NotCaptured) => {
                    warn!(
                        url = %record.original_url,
                        source = %source,
                        "Capture missing from source, trying alternates"
                    );
                    last_err = SourceError::NotCaptured;
                }
                Err(e @ SourceError::CircuitOpen { .. }) => {
                    last_err = e;
                }
                Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}
