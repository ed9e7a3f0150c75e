//! Common Crawl strategy: collection-index discovery, per-collection CDX
//! listing with page pagination, WARC range fetches for capture bytes.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hindsite_common::{
    ArchiveSource, CaptureRecord, CircuitBreaker, CircuitBreakerConfig, DateWindow, MatchType,
    SourceConfig, Target,
};

use crate::error::SourceError;
use crate::strategy::{guarded, normalize_listing, ArchiveStrategy, CaptureListing, FetchedCapture};

const DEFAULT_INDEX_BASE: &str = "https://index.commoncrawl.org";
const DEFAULT_DATA_BASE: &str = "https://data.commoncrawl.org";

/// One crawl collection from collinfo.json.
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlCollection {
    pub id: String,
    #[serde(rename = "cdx-api")]
    pub cdx_api: String,
}

impl CrawlCollection {
    /// Crawl year parsed from ids like "CC-MAIN-2024-10".
    fn year(&self) -> Option<i32> {
        self.id.strip_prefix("CC-MAIN-")?.split('-').next()?.parse().ok()
    }
}

/// One NDJSON line from a Common Crawl index query.
#[derive(Debug, Deserialize)]
struct IndexLine {
    timestamp: String,
    url: String,
    #[serde(default)]
    mime: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    length: Option<String>,
    #[serde(default)]
    offset: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

pub struct CommonCrawlStrategy {
    client: reqwest::Client,
    index_base: String,
    data_base: String,
    config: SourceConfig,
    list_cb: Arc<CircuitBreaker>,
    fetch_cb: Arc<CircuitBreaker>,
    /// collinfo.json is a handful of KB and changes monthly; cache per process.
    collections: Mutex<Option<Vec<CrawlCollection>>>,
}

impl CommonCrawlStrategy {
    pub fn new(config: SourceConfig, cb_config: CircuitBreakerConfig) -> Self {
        Self::with_endpoints(config, cb_config, DEFAULT_INDEX_BASE, DEFAULT_DATA_BASE)
    }

    pub fn with_endpoints(
        config: SourceConfig,
        cb_config: CircuitBreakerConfig,
        index_base: impl Into<String>,
        data_base: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            index_base: index_base.into(),
            data_base: data_base.into(),
            config,
            list_cb: Arc::new(CircuitBreaker::new("common_crawl.list", cb_config.clone())),
            fetch_cb: Arc::new(CircuitBreaker::new("common_crawl.fetch", cb_config)),
            collections: Mutex::new(None),
        }
    }

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

    async fn load_collections(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<CrawlCollection>, SourceError> {
        let mut cached = self.collections.lock().await;
        if let Some(collections) = cached.as_ref() {
            return Ok(collections.clone());
        }
        let url = format!("{}/collinfo.json", self.index_base);
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            r = self.client.get(&url).timeout(self.config.timeout()).send() => {
                r.map_err(|e| SourceError::from_transport(e, "commoncrawl collinfo"))?
            }
        };
        let status = response.status().as_u16();
        if status != 200 {
            return Err(SourceError::from_status(status, "commoncrawl collinfo"));
        }
        let collections: Vec<CrawlCollection> = response
            .json()
            .await
            .map_err(|e| SourceError::permanent(format!("commoncrawl collinfo: {e}")))?;
        *cached = Some(collections.clone());
        Ok(collections)
    }

    /// Collections whose crawl year overlaps the window, newest first
    /// (collinfo order).
    async fn collections_for_window(
        &self,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<CrawlCollection>, SourceError> {
        let from_year = window.from.format("%Y").to_string().parse::<i32>().unwrap_or(0);
        let to_year = window.to.format("%Y").to_string().parse::<i32>().unwrap_or(0);
        let collections = self.load_collections(cancel).await?;
        Ok(collections
            .into_iter()
            .filter(|c| {
                c.year()
                    .is_some_and(|y| y >= from_year && y <= to_year)
            })
            .collect())
    }

    /// Query one index page. A 404 from the index means "no captures on this
    /// page" and ends the collection, not a failure.
    async fn query_index_page(
        &self,
        collection: &CrawlCollection,
        url_param: &str,
        match_type: &str,
        window: DateWindow,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<CaptureRecord>>, SourceError> {
        let from = window.from_timestamp()[..8].to_string();
        let to = window.to_timestamp()[..8].to_string();
        let page_param = page.to_string();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            r = self
                .client
                .get(&collection.cdx_api)
                .timeout(self.config.timeout())
                .query(&[
                    ("url", url_param),
                    ("matchType", match_type),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                    ("output", "json"),
                    ("page", page_param.as_str()),
                ])
                .send() => r.map_err(|e| SourceError::from_transport(e, "commoncrawl index"))?,
        };
        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if status != 200 {
            return Err(SourceError::from_status(status, "commoncrawl index"));
        }
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::from_transport(e, "commoncrawl index body"))?;
        let records = body
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<IndexLine>(line).ok())
            .map(|line| CaptureRecord {
                timestamp: line.timestamp,
                original_url: line.url,
                mime_type: line.mime.unwrap_or_default().to_ascii_lowercase(),
                status_code: line
                    .status
                    .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
                    .unwrap_or_else(|| "0".to_string()),
                digest: line.digest.unwrap_or_default(),
                length: line.length.and_then(|l| l.parse().ok()).unwrap_or(0),
            })
            .collect();
        Ok(Some(records))
    }

    async fn list_pages(
        &self,
        target: &Target,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<CaptureListing, SourceError> {
        let (url_param, match_type) = Self::match_params(target);
        let collections = self.collections_for_window(window, cancel).await?;
        let mut records = Vec::new();
        let mut pages_fetched = 0u32;
        let mut truncated = false;
        let record_budget = if self.config.max_pages == 0 {
            usize::MAX
        } else {
            self.config.page_size as usize * self.config.max_pages as usize
        };

        'collections: for collection in &collections {
            let mut page = 0u32;
            loop {
                if cancel.is_cancelled() {
                    return Err(SourceError::Cancelled);
                }
                if self.config.max_pages > 0 && pages_fetched >= self.config.max_pages {
                    truncated = true;
                    break 'collections;
                }
                match self
                    .query_index_page(collection, &url_param, match_type, window, page, cancel)
                    .await?
                {
                    None => break,
                    Some(page_records) => {
                        pages_fetched += 1;
                        let empty = page_records.is_empty();
                        records.extend(page_records);
                        debug!(
                            collection = %collection.id,
                            page,
                            total = records.len(),
                            "Common Crawl index page fetched"
                        );
                        if empty {
                            break;
                        }
                        if records.len() >= record_budget {
                            truncated = true;
                            break 'collections;
                        }
                        page += 1;
                    }
                }
            }
        }

        let records = normalize_listing(records, window, target.include_attachments);
        info!(
            domain = %target.domain,
            records = records.len(),
            pages = pages_fetched,
            collections = collections.len(),
            truncated,
            "Common Crawl listing complete"
        );
        Ok(CaptureListing {
            records,
            pages_fetched,
            truncated,
        })
    }

    /// Locate the WARC segment for a capture by re-querying the index at the
    /// capture's exact day. The canonical record shape carries no offsets, so
    /// the segment coordinates are re-derived here.
    async fn locate_segment(
        &self,
        record: &CaptureRecord,
        cancel: &CancellationToken,
    ) -> Result<(String, u64, u64), SourceError> {
        let day = chrono::NaiveDate::parse_from_str(&record.timestamp[..8], "%Y%m%d")
            .map_err(|_| SourceError::permanent("invalid capture timestamp"))?;
        let window = DateWindow::new(day, day).map_err(SourceError::permanent)?;
        let collections = self.collections_for_window(window, cancel).await?;

        for collection in &collections {
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                r = self
                    .client
                    .get(&collection.cdx_api)
                    .timeout(self.config.timeout())
                    .query(&[
                        ("url", record.original_url.as_str()),
                        ("matchType", "exact"),
                        ("from", &record.timestamp[..8]),
                        ("to", &record.timestamp[..8]),
                        ("output", "json"),
                    ])
                    .send() => r.map_err(|e| SourceError::from_transport(e, "commoncrawl locate"))?,
            };
            let status = response.status().as_u16();
            if status == 404 {
                continue;
            }
            if status != 200 {
                return Err(SourceError::from_status(status, "commoncrawl locate"));
            }
            let body = response
                .text()
                .await
                .map_err(|e| SourceError::from_transport(e, "commoncrawl locate body"))?;
            for line in body.lines().filter(|l| !l.trim().is_empty()) {
                let Ok(parsed) = serde_json::from_str::<IndexLine>(line) else {
                    continue;
                };
                if parsed.timestamp != record.timestamp {
                    continue;
                }
                if let (Some(filename), Some(offset), Some(length)) =
                    (parsed.filename, parsed.offset, parsed.length)
                {
                    let offset: u64 = offset
                        .parse()
                        .map_err(|_| SourceError::permanent("commoncrawl locate: bad offset"))?;
                    let length: u64 = length
                        .parse()
                        .map_err(|_| SourceError::permanent("commoncrawl locate: bad length"))?;
                    return Ok((filename, offset, length));
                }
            }
        }
        Err(SourceError::NotCaptured)
    }
}

/// Decompress a gzipped WARC member and strip the WARC and HTTP header blocks,
/// returning the payload bytes and the HTTP headers.
fn parse_warc_segment(gz: &[u8]) -> Result<(Vec<u8>, HashMap<String, String>), SourceError> {
    let mut decoder = flate2::read::GzDecoder::new(gz);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| SourceError::permanent(format!("warc segment: gzip decode failed: {e}")))?;

    // WARC headers, then HTTP headers, then the body, each block ending in a
    // blank line.
    let warc_end = find_blank_line(&raw)
        .ok_or_else(|| SourceError::permanent("warc segment: missing WARC header terminator"))?;
    let rest = &raw[warc_end..];
    let http_end = find_blank_line(rest)
        .ok_or_else(|| SourceError::permanent("warc segment: missing HTTP header terminator"))?;

    let header_block = String::from_utf8_lossy(&rest[..http_end]);
    let mut headers = HashMap::new();
    for line in header_block.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    Ok((rest[http_end..].to_vec(), headers))
}

fn find_blank_line(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

#[async_trait]
impl ArchiveStrategy for CommonCrawlStrategy {
    fn source(&self) -> ArchiveSource {
        ArchiveSource::CommonCrawl
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
            ArchiveSource::CommonCrawl,
            self.list_pages(target, window, cancel),
        )
        .await
    }

    async fn fetch_capture(
        &self,
        record: &CaptureRecord,
        cancel: &CancellationToken,
    ) -> Result<FetchedCapture, SourceError> {
        guarded(&self.fetch_cb, ArchiveSource::CommonCrawl, async {
            let (filename, offset, length) = self.locate_segment(record, cancel).await?;
            let url = format!("{}/{}", self.data_base, filename);
            let range = format!("bytes={}-{}", offset, offset + length.saturating_sub(1));

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                r = self
                    .client
                    .get(&url)
                    .timeout(self.config.timeout())
                    .header(reqwest::header::RANGE, &range)
                    .send() => r.map_err(|e| SourceError::from_transport(e, "commoncrawl warc"))?,
            };
            let status = response.status().as_u16();
            if status == 404 {
                return Err(SourceError::NotCaptured);
            }
            if status != 200 && status != 206 {
                return Err(SourceError::from_status(status, "commoncrawl warc"));
            }
            let gz = response
                .bytes()
                .await
                .map_err(|e| SourceError::from_transport(e, "commoncrawl warc body"))?;

            let (bytes, headers) = parse_warc_segment(&gz)?;
            if bytes.is_empty() {
                warn!(url = %record.original_url, "Empty WARC payload");
            }
            Ok(FetchedCapture {
                bytes,
                headers,
                fetched_from: ArchiveSource::CommonCrawl,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn collection_year_parses() {
        let c = CrawlCollection {
            id: "CC-MAIN-2024-10".into(),
            cdx_api: "https://index.commoncrawl.org/CC-MAIN-2024-10-index".into(),
        };
        assert_eq!(c.year(), Some(2024));
        let bad = CrawlCollection {
            id: "weird".into(),
            cdx_api: String::new(),
        };
        assert_eq!(bad.year(), None);
    }

    #[test]
    fn warc_segment_round_trip() {
        let warc = b"WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: https://example.com/\r\n\r\nHTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\n<html><body>hello</body></html>";
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(warc).unwrap();
        let gz = encoder.finish().unwrap();

        let (bytes, headers) = parse_warc_segment(&gz).unwrap();
        assert_eq!(bytes, b"<html><body>hello</body></html>");
        assert_eq!(
            headers.get("content-type").map(String::as_str),
            Some("text/html; charset=utf-8")
        );
    }

    #[test]
    fn warc_segment_rejects_garbage() {
        assert!(parse_warc_segment(b"not gzip").is_err());
    }

    #[test]
    fn index_line_maps_to_record() {
        let line = r#"{"urlkey":"com,example)/","timestamp":"20240315120000","url":"https://example.com/","mime":"text/HTML","status":"200","digest":"AAAA","length":"512","offset":"1234","filename":"crawl-data/CC-MAIN-2024-10/segments/x/warc/y.warc.gz"}"#;
        let parsed: IndexLine = serde_json::from_str(line).unwrap();
        assert_eq!(parsed.timestamp, "20240315120000");
        assert_eq!(parsed.offset.as_deref(), Some("1234"));
    }
}
