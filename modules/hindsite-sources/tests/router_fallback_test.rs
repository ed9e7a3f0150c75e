//! Router fallback scenarios against scripted in-memory strategies.
//!
//! Run with: cargo test -p hindsite-sources --test router_fallback_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hindsite_common::{
    ArchivePolicy, ArchiveSelection, ArchiveSource, CaptureRecord, CircuitBreaker,
    CircuitBreakerConfig, DateWindow, FallbackStrategy, MatchType, SourceConfig, Target,
};
use hindsite_sources::{
    ArchiveStrategy, CaptureListing, FetchedCapture, RouterConfig, RouterError, SourceError,
    SourceMetrics, SourceRouter,
};

// ---------------------------------------------------------------------------
// Scripted strategy
// ---------------------------------------------------------------------------

/// Outcomes consumed one per `list_captures` call; the last entry repeats.
enum Script {
    Ok(usize),
    Retriable,
    Permanent,
}

struct ScriptedStrategy {
    source: ArchiveSource,
    config: SourceConfig,
    list_cb: Arc<CircuitBreaker>,
    fetch_cb: Arc<CircuitBreaker>,
    script: Vec<Script>,
    calls: AtomicUsize,
}

impl ScriptedStrategy {
    fn new(source: ArchiveSource, script: Vec<Script>) -> Self {
        Self {
            source,
            config: SourceConfig::default(),
            list_cb: Arc::new(CircuitBreaker::new(
                format!("{source}.list"),
                CircuitBreakerConfig::default(),
            )),
            fetch_cb: Arc::new(CircuitBreaker::new(
                format!("{source}.fetch"),
                CircuitBreakerConfig::default(),
            )),
            script,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn records(n: usize) -> Vec<CaptureRecord> {
    (0..n)
        .map(|i| CaptureRecord {
            timestamp: "20240115120000".into(),
            original_url: format!("https://example.com/page-{i:05}"),
            mime_type: "text/html".into(),
            status_code: "200".into(),
            digest: format!("digest-{i:05}"),
            length: 2048,
        })
        .collect()
}

#[async_trait]
impl ArchiveStrategy for ScriptedStrategy {
    fn source(&self) -> ArchiveSource {
        self.source
    }

    fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn list_cb(&self) -> &Arc<CircuitBreaker> {
        &self.list_cb
    }

    fn fetch_cb(&self) -> &Arc<CircuitBreaker> {
        &self.fetch_cb
    }

    async fn list_captures(
        &self,
        _target: &Target,
        _window: DateWindow,
        _cancel: &CancellationToken,
    ) -> Result<CaptureListing, SourceError> {
        // Guard with the list breaker the way the real strategies do.
        let permit = match self.list_cb.acquire() {
            Ok(p) => p,
            Err(()) => {
                return Err(SourceError::CircuitOpen {
                    archive_source: self.source,
                })
            }
        };
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.get(call).or_else(|| self.script.last());
        let result = match step {
            Some(Script::Ok(n)) => Ok(CaptureListing {
                records: records(*n),
                pages_fetched: 1,
                truncated: false,
            }),
            Some(Script::Retriable) => Err(SourceError::Retriable {
                message: "cdx: HTTP 522".into(),
                status: Some(522),
            }),
            Some(Script::Permanent) | None => Err(SourceError::permanent("cdx: HTTP 400")),
        };
        permit.record(!matches!(result, Err(SourceError::Retriable { .. })));
        result
    }

    async fn fetch_capture(
        &self,
        _record: &CaptureRecord,
        _cancel: &CancellationToken,
    ) -> Result<FetchedCapture, SourceError> {
        Err(SourceError::NotCaptured)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn target() -> Target {
    Target {
        id: Uuid::new_v4(),
        project_id: Uuid::new_v4(),
        domain: "example.com".into(),
        match_type: MatchType::HostExact,
        url_path: None,
        from_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        to_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        include_attachments: false,
    }
}

fn window() -> DateWindow {
    DateWindow::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
    )
    .unwrap()
}

fn hybrid_policy(strategy: FallbackStrategy) -> ArchivePolicy {
    ArchivePolicy {
        archive_source: ArchiveSelection::Hybrid,
        fallback_enabled: true,
        fallback_strategy: strategy,
        // No sleeping in tests.
        fallback_delay_seconds: 0.0,
        exponential_backoff: true,
        max_fallback_delay: 1.0,
        wayback_machine: SourceConfig {
            priority: 1,
            max_retries: 2,
            ..SourceConfig::default()
        },
        common_crawl: SourceConfig {
            priority: 2,
            max_retries: 2,
            ..SourceConfig::default()
        },
    }
}

fn router(
    wayback: Arc<ScriptedStrategy>,
    commoncrawl: Arc<ScriptedStrategy>,
) -> SourceRouter {
    SourceRouter::new(
        vec![wayback, commoncrawl],
        Arc::new(SourceMetrics::new()),
        RouterConfig::default(),
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Wayback throws 522 persistently; Common Crawl answers with 1,156 captures.
/// The run succeeds through fallback, with per-attempt stats.
#[tokio::test]
async fn wayback_522_falls_back_to_common_crawl() {
    let wayback = Arc::new(ScriptedStrategy::new(
        ArchiveSource::WaybackMachine,
        vec![Script::Retriable, Script::Retriable, Script::Retriable],
    ));
    let commoncrawl = Arc::new(ScriptedStrategy::new(
        ArchiveSource::CommonCrawl,
        vec![Script::Ok(1156)],
    ));
    let router = router(wayback.clone(), commoncrawl.clone());
    let policy = hybrid_policy(FallbackStrategy::RetryThenFallback);

    let listing = router
        .list_captures(&policy, &target(), window(), &CancellationToken::new())
        .await
        .expect("fallback should succeed");

    assert_eq!(listing.records.len(), 1156);
    assert_eq!(listing.stats.primary_source, ArchiveSource::WaybackMachine);
    assert_eq!(
        listing.stats.successful_source,
        Some(ArchiveSource::CommonCrawl)
    );
    assert!(listing.stats.fallback_used);

    // Initial attempt + 2 retries on wayback, then one common crawl success.
    assert_eq!(wayback.calls(), 3);
    assert_eq!(commoncrawl.calls(), 1);
    assert_eq!(listing.stats.attempts.len(), 4);
    assert!(listing.stats.attempts[..3]
        .iter()
        .all(|a| a.source == ArchiveSource::WaybackMachine && !a.success));
    let last = listing.stats.attempts.last().unwrap();
    assert_eq!(last.source, ArchiveSource::CommonCrawl);
    assert!(last.success);
    assert_eq!(last.records, 1156);
}

/// All sources down: the router aggregates attempt details instead of
/// surfacing a raw source error.
#[tokio::test]
async fn all_sources_failed_carries_attempts() {
    let wayback = Arc::new(ScriptedStrategy::new(
        ArchiveSource::WaybackMachine,
        vec![Script::Retriable],
    ));
    let commoncrawl = Arc::new(ScriptedStrategy::new(
        ArchiveSource::CommonCrawl,
        vec![Script::Retriable],
    ));
    let router = router(wayback, commoncrawl);
    let policy = hybrid_policy(FallbackStrategy::Immediate);

    let err = router
        .list_captures(&policy, &target(), window(), &CancellationToken::new())
        .await
        .expect_err("everything is down");

    match err {
        RouterError::AllSourcesFailed { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert!(attempts.iter().all(|a| !a.success));
        }
        other => panic!("expected AllSourcesFailed, got {other:?}"),
    }
}

/// Under the circuit_breaker strategy only a breaker rejection moves to the
/// next source; a plain retriable error surfaces.
#[tokio::test]
async fn circuit_breaker_strategy_surfaces_non_breaker_errors() {
    let wayback = Arc::new(ScriptedStrategy::new(
        ArchiveSource::WaybackMachine,
        vec![Script::Retriable],
    ));
    let commoncrawl = Arc::new(ScriptedStrategy::new(
        ArchiveSource::CommonCrawl,
        vec![Script::Ok(10)],
    ));
    let router = router(wayback, commoncrawl.clone());
    let policy = hybrid_policy(FallbackStrategy::CircuitBreaker);

    let err = router
        .list_captures(&policy, &target(), window(), &CancellationToken::new())
        .await
        .expect_err("retriable error surfaces under circuit_breaker strategy");
    assert!(matches!(err, RouterError::Source(SourceError::Retriable { .. })));
    assert_eq!(commoncrawl.calls(), 0);
}

/// Primary breaker open + secondary closed: the secondary serves the listing
/// and the stats show a fallback.
#[tokio::test]
async fn open_primary_breaker_falls_back() {
    let wayback = Arc::new(ScriptedStrategy::new(
        ArchiveSource::WaybackMachine,
        vec![Script::Ok(5)],
    ));
    let commoncrawl = Arc::new(ScriptedStrategy::new(
        ArchiveSource::CommonCrawl,
        vec![Script::Ok(7)],
    ));

    // Trip wayback's list breaker open by recording failures directly.
    for _ in 0..CircuitBreakerConfig::default().failure_threshold {
        wayback.list_cb().acquire().expect("closed").record(false);
    }

    let router = router(wayback.clone(), commoncrawl.clone());
    let policy = hybrid_policy(FallbackStrategy::CircuitBreaker);

    let listing = router
        .list_captures(&policy, &target(), window(), &CancellationToken::new())
        .await
        .expect("secondary should serve");

    // Hybrid ordering still puts wayback first (priority 1); its guarded call
    // is rejected without invoking the strategy.
    assert_eq!(wayback.calls(), 0);
    assert_eq!(commoncrawl.calls(), 1);
    assert_eq!(listing.records.len(), 7);
    assert_eq!(listing.stats.primary_source, ArchiveSource::WaybackMachine);
    assert_eq!(
        listing.stats.successful_source,
        Some(ArchiveSource::CommonCrawl)
    );
    assert!(listing.stats.fallback_used);
}

/// An empty listing is a success, not a failure.
#[tokio::test]
async fn empty_listing_is_success() {
    let wayback = Arc::new(ScriptedStrategy::new(
        ArchiveSource::WaybackMachine,
        vec![Script::Ok(0)],
    ));
    let commoncrawl = Arc::new(ScriptedStrategy::new(
        ArchiveSource::CommonCrawl,
        vec![Script::Ok(50)],
    ));
    let router = router(wayback, commoncrawl.clone());
    let policy = hybrid_policy(FallbackStrategy::Immediate);

    let listing = router
        .list_captures(&policy, &target(), window(), &CancellationToken::new())
        .await
        .expect("empty is fine");
    assert!(listing.records.is_empty());
    assert!(!listing.stats.fallback_used);
    assert_eq!(commoncrawl.calls(), 0);
}

/// Disabled sources are skipped when resolving the order.
#[tokio::test]
async fn disabled_primary_is_skipped() {
    let wayback = Arc::new(ScriptedStrategy::new(
        ArchiveSource::WaybackMachine,
        vec![Script::Ok(5)],
    ));
    let commoncrawl = Arc::new(ScriptedStrategy::new(
        ArchiveSource::CommonCrawl,
        vec![Script::Ok(3)],
    ));
    let router = router(wayback.clone(), commoncrawl);
    let mut policy = hybrid_policy(FallbackStrategy::Immediate);
    policy.wayback_machine.enabled = false;

    let listing = router
        .list_captures(&policy, &target(), window(), &CancellationToken::new())
        .await
        .expect("common crawl serves");
    assert_eq!(wayback.calls(), 0);
    assert_eq!(listing.stats.primary_source, ArchiveSource::CommonCrawl);
    assert!(!listing.stats.fallback_used);
}

/// Cancellation propagates out of the router as `Cancelled`.
#[tokio::test]
async fn cancellation_short_circuits() {
    let wayback = Arc::new(ScriptedStrategy::new(
        ArchiveSource::WaybackMachine,
        vec![Script::Ok(5)],
    ));
    let commoncrawl = Arc::new(ScriptedStrategy::new(
        ArchiveSource::CommonCrawl,
        vec![Script::Ok(5)],
    ));
    let router = router(wayback, commoncrawl);
    let policy = hybrid_policy(FallbackStrategy::Immediate);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = router
        .list_captures(&policy, &target(), window(), &cancel)
        .await
        .expect_err("cancelled before start");
    assert!(matches!(err, RouterError::Cancelled));
}
