//! The archive source capability set. Wayback and Common Crawl implement the
//! same listing/fetching contract; the router only sees this trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hindsite_common::{
    is_attachment_mime, is_html_mime, ArchiveSource, CaptureRecord, CircuitBreaker, DateWindow,
    SourceConfig, Target,
};

use crate::error::SourceError;

/// One page-bounded listing of captures from a single source.
#[derive(Debug, Clone, Default)]
pub struct CaptureListing {
    /// Sorted by (original_url asc, timestamp asc), deduplicated within the
    /// listing by (digest, timestamp, url).
    pub records: Vec<CaptureRecord>,
    pub pages_fetched: u32,
    /// True when max_pages stopped the listing before the source ran dry.
    pub truncated: bool,
}

/// Raw archived bytes for a capture, with the response headers that matter
/// downstream (content-type mainly).
#[derive(Debug, Clone)]
pub struct FetchedCapture {
    pub bytes: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub fetched_from: ArchiveSource,
}

/// Polymorphic archive source: list captures for a target window, fetch the
/// bytes behind a capture. Each strategy owns a circuit breaker per
/// operation.
#[async_trait]
pub trait ArchiveStrategy: Send + Sync {
    fn source(&self) -> ArchiveSource;

    fn config(&self) -> &SourceConfig;

    /// Breaker guarding `list_captures`.
    fn list_cb(&self) -> &Arc<CircuitBreaker>;

    /// Breaker guarding `fetch_capture`.
    fn fetch_cb(&self) -> &Arc<CircuitBreaker>;

    /// List captures for `target` within `window`. Guarantees: timestamps are
    /// 14-char UTC inside the window, mime lowercased, status numeric, at most
    /// `max_pages` pages of `page_size` fetched, deterministic ordering.
    async fn list_captures(
        &self,
        target: &Target,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<CaptureListing, SourceError>;

    /// Fetch the archived bytes for a capture this source listed.
    async fn fetch_capture(
        &self,
        record: &CaptureRecord,
        cancel: &CancellationToken,
    ) -> Result<FetchedCapture, SourceError>;
}

/// Mime admission shared by both strategies: HTML always, attachment types
/// only when the target opted in, anything else dropped.
pub(crate) fn admit_mime(mime: &str, include_attachments: bool) -> bool {
    is_html_mime(mime) || (include_attachments && is_attachment_mime(mime))
}

/// Post-process a raw listing into the contract shape: window check, mime
/// admission, in-listing dedup, deterministic order.
pub(crate) fn normalize_listing(
    mut records: Vec<CaptureRecord>,
    window: DateWindow,
    include_attachments: bool,
) -> Vec<CaptureRecord> {
    let mut seen = std::collections::HashSet::new();
    records.retain(|r| {
        hindsite_common::is_valid_timestamp14(&r.timestamp)
            && window.contains(&r.timestamp)
            && admit_mime(&r.mime_type, include_attachments)
            && seen.insert(r.dedup_key())
    });
    records.sort_by(|a, b| {
        a.original_url
            .cmp(&b.original_url)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
    records
}

/// Run the guarded section under a breaker, mapping refusal to `CircuitOpen`.
/// Retriable errors feed failure accounting; permanent/not-captured responses
/// mean the source answered and count as breaker successes. Cancellation
/// drops the permit unrecorded.
pub(crate) async fn guarded<T, Fut>(
    cb: &CircuitBreaker,
    source: ArchiveSource,
    op: Fut,
) -> Result<T, SourceError>
where
    Fut: std::future::Future<Output = Result<T, SourceError>>,
{
    let permit = match cb.acquire() {
        Ok(p) => p,
        Err(()) => return Err(SourceError::CircuitOpen { archive_source: source }),
    };
    let result = op.await;
    match &result {
        Ok(_) => permit.record(true),
        Err(SourceError::Retriable { .. }) => permit.record(false),
        Err(SourceError::Cancelled) => drop(permit),
        Err(_) => permit.record(true),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
        .unwrap()
    }

    fn record(url: &str, ts: &str, mime: &str, digest: &str) -> CaptureRecord {
        CaptureRecord {
            timestamp: ts.into(),
            original_url: url.into(),
            mime_type: mime.into(),
            status_code: "200".into(),
            digest: digest.into(),
            length: 1000,
        }
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let records = vec![
            record("https://example.com/b", "20240601000000", "text/html", "d2"),
            record("https://example.com/a", "20240701000000", "text/html", "d1"),
            record("https://example.com/a", "20240101000000", "text/html", "d3"),
            record("https://example.com/a", "20240101000000", "text/html", "d3"),
        ];
        let out = normalize_listing(records, window(), false);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].original_url, "https://example.com/a");
        assert_eq!(out[0].timestamp, "20240101000000");
        assert_eq!(out[1].timestamp, "20240701000000");
        assert_eq!(out[2].original_url, "https://example.com/b");
    }

    #[test]
    fn normalize_drops_out_of_window_and_bad_mime() {
        let records = vec![
            record("https://example.com/a", "20230101000000", "text/html", "d1"),
            record("https://example.com/b", "20240601000000", "image/png", "d2"),
            record(
                "https://example.com/c",
                "20240601000000",
                "application/pdf",
                "d3",
            ),
        ];
        let out = normalize_listing(records.clone(), window(), false);
        assert!(out.is_empty());

        // Attachments admitted when the target opts in; the PNG stays out.
        let out = normalize_listing(records, window(), true);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mime_type, "application/pdf");
    }
}
