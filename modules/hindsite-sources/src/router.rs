//! Archive source router: resolves a project's archive policy into an ordered
//! source list, runs listings with retry/fallback, and merges hybrid results.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hindsite_common::{
    ArchivePolicy, ArchiveSelection, ArchiveSource, CaptureRecord, CircuitState, DateWindow,
    FallbackStrategy, Target,
};

use crate::error::{SourceError, SourceErrorKind};
use crate::metrics::SourceMetrics;
use crate::strategy::ArchiveStrategy;

/// Router-level tuning independent of per-project policy.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Hybrid completion mode: after a successful primary listing, also query
    /// the next source and merge, for sources marked partial-coverage.
    pub merge_secondary: bool,
    /// Sources known to have partial coverage, eligible for completion merge.
    pub partial_coverage: Vec<ArchiveSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptDetail {
    pub source: ArchiveSource,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub duration_ms: u64,
    pub records: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub primary_source: ArchiveSource,
    pub successful_source: Option<ArchiveSource>,
    pub fallback_used: bool,
    pub attempts: Vec<AttemptDetail>,
    pub pages_fetched: u32,
}

#[derive(Debug, Clone)]
pub struct RoutedListing {
    pub records: Vec<CaptureRecord>,
    pub stats: RouterStats,
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("all archive sources failed ({} attempts)", attempts.len())]
    AllSourcesFailed { attempts: Vec<AttemptDetail> },

    /// Surfaced directly under the circuit_breaker fallback strategy when the
    /// error is not a breaker rejection.
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("no enabled archive source for this policy")]
    NoSources,

    #[error("cancelled")]
    Cancelled,
}

pub struct SourceRouter {
    strategies: Vec<Arc<dyn ArchiveStrategy>>,
    metrics: Arc<SourceMetrics>,
    config: RouterConfig,
}

impl SourceRouter {
    pub fn new(
        strategies: Vec<Arc<dyn ArchiveStrategy>>,
        metrics: Arc<SourceMetrics>,
        config: RouterConfig,
    ) -> Self {
        Self {
            strategies,
            metrics,
            config,
        }
    }

    pub fn strategies(&self) -> &[Arc<dyn ArchiveStrategy>] {
        &self.strategies
    }

    pub fn metrics(&self) -> &Arc<SourceMetrics> {
        &self.metrics
    }

    pub fn strategy(&self, source: ArchiveSource) -> Option<&Arc<dyn ArchiveStrategy>> {
        self.strategies.iter().find(|s| s.source() == source)
    }

    /// Resolve the policy into an ordered source list, skipping disabled
    /// sources. Hybrid orders by (configured priority asc, healthier breaker
    /// first).
    pub fn resolve_order(&self, policy: &ArchivePolicy) -> Vec<Arc<dyn ArchiveStrategy>> {
        let enabled = |source: ArchiveSource| {
            policy.source_config(source).enabled
        };
        match policy.archive_source {
            ArchiveSelection::WaybackMachine => self
                .strategy(ArchiveSource::WaybackMachine)
                .filter(|_| enabled(ArchiveSource::WaybackMachine))
                .cloned()
                .into_iter()
                .collect(),
            ArchiveSelection::CommonCrawl => self
                .strategy(ArchiveSource::CommonCrawl)
                .filter(|_| enabled(ArchiveSource::CommonCrawl))
                .cloned()
                .into_iter()
                .collect(),
            ArchiveSelection::Hybrid => {
                let mut ordered: Vec<_> = self
                    .strategies
                    .iter()
                    .filter(|s| enabled(s.source()))
                    .cloned()
                    .collect();
                ordered.sort_by_key(|s| {
                    let health_rank = match s.list_cb().state() {
                        CircuitState::Closed => 0u8,
                        CircuitState::HalfOpen => 1,
                        CircuitState::Open => 2,
                    };
                    (policy.source_config(s.source()).priority, health_rank)
                });
                ordered
            }
        }
    }

    /// List captures for a target, honoring policy and source health.
    pub async fn list_captures(
        &self,
        policy: &ArchivePolicy,
        target: &Target,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<RoutedListing, RouterError> {
        let order = self.resolve_order(policy);
        let Some(primary) = order.first() else {
            return Err(RouterError::NoSources);
        };
        let primary_source = primary.source();
        let mut attempts: Vec<AttemptDetail> = Vec::new();

        for (idx, strategy) in order.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(RouterError::Cancelled);
            }
            let has_remaining = idx + 1 < order.len();
            let source = strategy.source();

            match self
                .attempt_source(policy, strategy.as_ref(), target, window, cancel, &mut attempts)
                .await
            {
                Ok(listing) => {
                    let fallback_used = source != primary_source;
                    let mut records = listing.records;
                    let mut pages_fetched = listing.pages_fetched;

                    // Second defense behind the strategies' own mime
                    // filtering: attachments never pass a target that
                    // opted out.
                    if !target.include_attachments {
                        records.retain(|r| !hindsite_common::is_attachment_mime(&r.mime_type));
                    }

                    // Optional hybrid completion: merge the next source into a
                    // successful primary listing for partial-coverage sources.
                    if !fallback_used
                        && self.config.merge_secondary
                        && policy.archive_source == ArchiveSelection::Hybrid
                        && self.config.partial_coverage.contains(&source)
                    {
                        if let Some(secondary) = order.get(idx + 1) {
                            match self
                                .attempt_source(
                                    policy,
                                    secondary.as_ref(),
                                    target,
                                    window,
                                    cancel,
                                    &mut attempts,
                                )
                                .await
                            {
                                Ok(extra) => {
                                    pages_fetched += extra.pages_fetched;
                                    records = merge_listings(records, extra.records);
                                }
                                Err(e) => {
                                    warn!(
                                        secondary = %secondary.source(),
                                        error = %e,
                                        "Hybrid completion merge failed, keeping primary listing"
                                    );
                                }
                            }
                        }
                    }

                    let stats = RouterStats {
                        primary_source,
                        successful_source: Some(source),
                        fallback_used,
                        attempts,
                        pages_fetched,
                    };
                    info!(
                        domain = %target.domain,
                        source = %source,
                        records = records.len(),
                        fallback_used,
                        "Capture listing routed"
                    );
                    return Ok(RoutedListing { records, stats });
                }
                Err(e) => {
                    if matches!(e, SourceError::Cancelled) {
                        return Err(RouterError::Cancelled);
                    }
                    if !should_fallback(policy.fallback_strategy, &e, policy.fallback_enabled) {
                        return Err(RouterError::Source(e));
                    }
                    if has_remaining {
                        warn!(
                            source = %source,
                            error = %e,
                            "Source failed, falling back"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(RouterError::Cancelled),
                            _ = tokio::time::sleep(policy.fallback_delay()) => {}
                        }
                    }
                }
            }
        }

        Err(RouterError::AllSourcesFailed { attempts })
    }

    /// One source's attempt loop: the listing call plus policy-driven retries
    /// for retriable errors under `retry_then_fallback`.
    async fn attempt_source(
        &self,
        policy: &ArchivePolicy,
        strategy: &dyn ArchiveStrategy,
        target: &Target,
        window: DateWindow,
        cancel: &CancellationToken,
        attempts: &mut Vec<AttemptDetail>,
    ) -> Result<crate::strategy::CaptureListing, SourceError> {
        let source = strategy.source();
        let max_retries = if policy.fallback_strategy == FallbackStrategy::RetryThenFallback {
            strategy.config().max_retries
        } else {
            0
        };

        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            let result = strategy.list_captures(target, window, cancel).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(listing) => {
                    self.metrics
                        .record_success(source, duration_ms, listing.records.len() as u64);
                    attempts.push(AttemptDetail {
                        source,
                        success: true,
                        error_type: None,
                        duration_ms,
                        records: listing.records.len() as u64,
                    });
                    return Ok(listing);
                }
                Err(e) => {
                    if !matches!(e, SourceError::Cancelled) {
                        self.metrics.record_failure(source, duration_ms, e.kind());
                        attempts.push(AttemptDetail {
                            source,
                            success: false,
                            error_type: Some(e.kind().as_str().to_string()),
                            duration_ms,
                            records: 0,
                        });
                    }
                    if e.is_retriable() && attempt < max_retries {
                        let delay = policy.retry_delay(attempt);
                        attempt += 1;
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Whether an error moves the router to the next source under the configured
/// fallback strategy.
fn should_fallback(strategy: FallbackStrategy, error: &SourceError, fallback_enabled: bool) -> bool {
    if !fallback_enabled {
        return false;
    }
    match strategy {
        FallbackStrategy::Immediate => true,
        // Retries already happened inside the attempt loop; any surviving
        // error falls through to the next source.
        FallbackStrategy::RetryThenFallback => true,
        FallbackStrategy::CircuitBreaker => error.kind() == SourceErrorKind::CircuitOpen,
    }
}

/// Merge a secondary listing into the primary one. Records already present by
/// (original_url, timestamp) or digest keep the primary's version; the result
/// is re-sorted into the deterministic stream order.
fn merge_listings(
    primary: Vec<CaptureRecord>,
    secondary: Vec<CaptureRecord>,
) -> Vec<CaptureRecord> {
    let mut by_key: HashSet<(String, String)> = primary
        .iter()
        .map(|r| (r.original_url.clone(), r.timestamp.clone()))
        .collect();
    let mut digests: HashSet<String> = primary.iter().map(|r| r.digest.clone()).collect();

    let mut merged = primary;
    for record in secondary {
        let key = (record.original_url.clone(), record.timestamp.clone());
        if by_key.contains(&key) || digests.contains(&record.digest) {
            continue;
        }
        by_key.insert(key);
        digests.insert(record.digest.clone());
        merged.push(record);
    }
    merged.sort_by(|a, b| {
        a.original_url
            .cmp(&b.original_url)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
    merged
}

/// Per-source attempt summary keyed for logs and the metrics endpoint.
pub fn attempts_by_source(attempts: &[AttemptDetail]) -> HashMap<ArchiveSource, (u64, u64)> {
    let mut out: HashMap<ArchiveSource, (u64, u64)> = HashMap::new();
    for attempt in attempts {
        let entry = out.entry(attempt.source).or_default();
        if attempt.success {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, ts: &str, digest: &str) -> CaptureRecord {
        CaptureRecord {
            timestamp: ts.into(),
            original_url: url.into(),
            mime_type: "text/html".into(),
            status_code: "200".into(),
            digest: digest.into(),
            length: 100,
        }
    }

    #[test]
    fn merge_prefers_primary_and_sorts() {
        let primary = vec![
            record("https://example.com/a", "20240101000000", "d1"),
            record("https://example.com/c", "20240103000000", "d2"),
        ];
        let secondary = vec![
            // Same (url, ts): dropped.
            record("https://example.com/a", "20240101000000", "d9"),
            // Same digest as primary: dropped.
            record("https://example.com/b", "20240102000000", "d1"),
            // New: kept and sorted into place.
            record("https://example.com/b", "20240102010000", "d3"),
        ];
        let merged = merge_listings(primary, secondary);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].original_url, "https://example.com/a");
        assert_eq!(merged[1].original_url, "https://example.com/b");
        assert_eq!(merged[1].digest, "d3");
        assert_eq!(merged[2].original_url, "https://example.com/c");
    }

    #[test]
    fn fallback_policy_matrix() {
        let retriable = SourceError::retriable("boom");
        let permanent = SourceError::permanent("nope");
        let open = SourceError::CircuitOpen {
            archive_source: ArchiveSource::WaybackMachine,
        };

        assert!(should_fallback(FallbackStrategy::Immediate, &permanent, true));
        assert!(should_fallback(
            FallbackStrategy::RetryThenFallback,
            &retriable,
            true
        ));
        assert!(!should_fallback(
            FallbackStrategy::CircuitBreaker,
            &retriable,
            true
        ));
        assert!(should_fallback(FallbackStrategy::CircuitBreaker, &open, true));
        assert!(!should_fallback(FallbackStrategy::Immediate, &permanent, false));
    }
}
