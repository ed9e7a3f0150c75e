//! Wayback Machine strategy: CDX listing with resume-key pagination, replay
//! fetches through the raw (`id_`) endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hindsite_common::{
    ArchiveSource, CaptureRecord, CircuitBreaker, CircuitBreakerConfig, DateWindow, MatchType,
    SourceConfig, Target,
};

use crate::error::SourceError;
use crate::strategy::{guarded, normalize_listing, ArchiveStrategy, CaptureListing, FetchedCapture};

const DEFAULT_CDX_BASE: &str = "https://web.archive.org/cdx/search/cdx";
const DEFAULT_REPLAY_BASE: &str = "https://web.archive.org/web";

pub struct WaybackStrategy {
    client: reqwest::Client,
    cdx_base: String,
    replay_base: String,
    config: SourceConfig,
    list_cb: Arc<CircuitBreaker>,
    fetch_cb: Arc<CircuitBreaker>,
}

impl WaybackStrategy {
    pub fn new(config: SourceConfig, cb_config: CircuitBreakerConfig) -> Self {
        Self::with_endpoints(config, cb_config, DEFAULT_CDX_BASE, DEFAULT_REPLAY_BASE)
    }

    /// Endpoint override for tests against a local stub server.
    pub fn with_endpoints(
        config: SourceConfig,
        cb_config: CircuitBreakerConfig,
        cdx_base: impl Into<String>,
        replay_base: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            cdx_base: cdx_base.into(),
            replay_base: replay_base.into(),
            config,
            list_cb: Arc::new(CircuitBreaker::new("wayback.list", cb_config.clone())),
            fetch_cb: Arc::new(CircuitBreaker::new("wayback.fetch", cb_config)),
        }
    }

    /// CDX `url` + `matchType` parameters for a target.
    fn match_params(target: &Target) -> (String, &'static str) {
        match target.match_type {
            MatchType::HostExact => (target.domain.clone(), "host"),
            MatchType::Subdomain => (target.domain.clone(), "domain"),
            MatchType::Prefix => {
                let path = target.url_path.as_deref().unwrap_or("/");
                (format!("{}{}", target.domain, path), "prefix")
            }
        }
    }

    async fn list_pages(
        &self,
        target: &Target,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<CaptureListing, SourceError> {
        let (url_param, match_type) = Self::match_params(target);
        let mut records = Vec::new();
        let mut resume_key: Option<String> = None;
        let mut pages_fetched = 0u32;
        let mut truncated = false;

        loop {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            if self.config.max_pages > 0 && pages_fetched >= self.config.max_pages {
                truncated = resume_key.is_some();
                break;
            }

            let from = window.from_timestamp()[..8].to_string();
            let to = window.to_timestamp()[..8].to_string();
            let limit = self.config.page_size.to_string();
            let mut request = self
                .client
                .get(&self.cdx_base)
                .timeout(self.config.timeout())
                .query(&[
                    ("url", url_param.as_str()),
                    ("matchType", match_type),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                    ("output", "json"),
                    ("limit", limit.as_str()),
                    ("showResumeKey", "true"),
                ]);
            if let Some(key) = &resume_key {
                request = request.query(&[("resumeKey", key.as_str())]);
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                r = request.send() => r.map_err(|e| SourceError::from_transport(e, "wayback cdx"))?,
            };
            let status = response.status().as_u16();
            if status != 200 {
                return Err(SourceError::from_status(status, "wayback cdx"));
            }

            let body: Vec<Vec<String>> = response
                .json()
                .await
                .map_err(|e| SourceError::permanent(format!("wayback cdx: malformed body: {e}")))?;
            pages_fetched += 1;

            let (page_records, next_key) = parse_cdx_page(&body)?;
            let page_len = page_records.len();
            records.extend(page_records);
            debug!(
                url = %url_param,
                page = pages_fetched,
                records = page_len,
                "Wayback CDX page fetched"
            );

            match next_key {
                Some(key) => resume_key = Some(key),
                None => break,
            }
        }

        let records = normalize_listing(records, window, target.include_attachments);
        info!(
            domain = %target.domain,
            records = records.len(),
            pages = pages_fetched,
            truncated,
            "Wayback listing complete"
        );
        Ok(CaptureListing {
            records,
            pages_fetched,
            truncated,
        })
    }
}

/// Parse one CDX JSON page: header row, data rows, and (with
/// `showResumeKey=true`) a trailing empty row followed by the resume key.
fn parse_cdx_page(body: &[Vec<String>]) -> Result<(Vec<CaptureRecord>, Option<String>), SourceError> {
    if body.is_empty() {
        return Ok((Vec::new(), None));
    }
    let header = &body[0];
    let col = |name: &str| header.iter().position(|h| h == name);
    let (ts_i, url_i, mime_i, status_i, digest_i, length_i) = match (
        col("timestamp"),
        col("original"),
        col("mimetype"),
        col("statuscode"),
        col("digest"),
        col("length"),
    ) {
        (Some(a), Some(b), Some(c), Some(d), Some(e), Some(f)) => (a, b, c, d, e, f),
        _ => {
            return Err(SourceError::permanent(
                "wayback cdx: unexpected header row".to_string(),
            ))
        }
    };

    let mut records = Vec::new();
    let mut resume_key = None;
    let mut rows = body[1..].iter().peekable();
    while let Some(row) = rows.next() {
        if row.is_empty() {
            // Resume-key sentinel: empty row, then the key itself.
            if let Some(key_row) = rows.next() {
                resume_key = key_row.first().cloned().filter(|k| !k.is_empty());
            }
            break;
        }
        let get = |i: usize| row.get(i).cloned().unwrap_or_default();
        let status_code = get(status_i);
        records.push(CaptureRecord {
            timestamp: get(ts_i),
            original_url: get(url_i),
            mime_type: get(mime_i).to_ascii_lowercase(),
            status_code: if status_code.bytes().all(|b| b.is_ascii_digit()) && !status_code.is_empty()
            {
                status_code
            } else {
                "0".to_string()
            },
            digest: get(digest_i),
            length: get(length_i).parse().unwrap_or(0),
        });
    }
    Ok((records, resume_key))
}

#[async_trait]
impl ArchiveStrategy for WaybackStrategy {
    fn source(&self) -> ArchiveSource {
        ArchiveSource::WaybackMachine
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
        target: &Target,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<CaptureListing, SourceError> {
        guarded(
            &self.list_cb,
            ArchiveSource::WaybackMachine,
            self.list_pages(target, window, cancel),
        )
        .await
    }

    async fn fetch_capture(
        &self,
        record: &CaptureRecord,
        cancel: &CancellationToken,
    ) -> Result<FetchedCapture, SourceError> {
        // `id_` returns the original archived bytes without replay rewriting.
        let url = format!(
            "{}/{}id_/{}",
            self.replay_base, record.timestamp, record.original_url
        );
        guarded(&self.fetch_cb, ArchiveSource::WaybackMachine, async {
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                r = self.client.get(&url).timeout(self.config.timeout()).send() => {
                    r.map_err(|e| SourceError::from_transport(e, "wayback replay"))?
                }
            };
            let status = response.status().as_u16();
            if status == 404 {
                return Err(SourceError::NotCaptured);
            }
            if status != 200 {
                return Err(SourceError::from_status(status, "wayback replay"));
            }
            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_ascii_lowercase(),
                        v.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| SourceError::from_transport(e, "wayback replay body"))?;
            Ok(FetchedCapture {
                bytes: bytes.to_vec(),
                headers,
                fetched_from: ArchiveSource::WaybackMachine,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    const HEADER: &[&str] = &[
        "urlkey",
        "timestamp",
        "original",
        "mimetype",
        "statuscode",
        "digest",
        "length",
    ];

    #[test]
    fn parses_rows_and_resume_key() {
        let body = rows(&[
            HEADER,
            &[
                "com,example)/",
                "20240315120000",
                "https://example.com/",
                "text/HTML",
                "200",
                "3F2A1B9C",
                "5120",
            ],
            &[],
            &["resume-abc"],
        ]);
        let (records, key) = parse_cdx_page(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mime_type, "text/html");
        assert_eq!(records[0].length, 5120);
        assert_eq!(key.as_deref(), Some("resume-abc"));
    }

    #[test]
    fn parses_final_page_without_key() {
        let body = rows(&[
            HEADER,
            &[
                "com,example)/a",
                "20240315120000",
                "https://example.com/a",
                "text/html",
                "200",
                "AAAA",
                "100",
            ],
        ]);
        let (records, key) = parse_cdx_page(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert!(key.is_none());
    }

    #[test]
    fn non_numeric_status_normalized() {
        let body = rows(&[
            HEADER,
            &[
                "com,example)/a",
                "20240315120000",
                "https://example.com/a",
                "warc/revisit",
                "-",
                "AAAA",
                "-",
            ],
        ]);
        let (records, _) = parse_cdx_page(&body).unwrap();
        assert_eq!(records[0].status_code, "0");
        assert_eq!(records[0].length, 0);
    }

    #[test]
    fn empty_body_is_empty_success() {
        let (records, key) = parse_cdx_page(&[]).unwrap();
        assert!(records.is_empty());
        assert!(key.is_none());
    }

    #[test]
    fn match_params_per_type() {
        let mut target = Target {
            id: uuid::Uuid::new_v4(),
            project_id: uuid::Uuid::new_v4(),
            domain: "example.com".into(),
            match_type: MatchType::HostExact,
            url_path: None,
            from_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            to_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            include_attachments: false,
        };
        assert_eq!(
            WaybackStrategy::match_params(&target),
            ("example.com".into(), "host")
        );
        target.match_type = MatchType::Subdomain;
        assert_eq!(
            WaybackStrategy::match_params(&target),
            ("example.com".into(), "domain")
        );
        target.match_type = MatchType::Prefix;
        target.url_path = Some("/blog".into());
        assert_eq!(
            WaybackStrategy::match_params(&target),
            ("example.com/blog".into(), "prefix")
        );
    }
}
