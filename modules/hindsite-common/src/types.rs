use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Archive sources ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveSource {
    WaybackMachine,
    CommonCrawl,
}

impl ArchiveSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveSource::WaybackMachine => "wayback_machine",
            ArchiveSource::CommonCrawl => "common_crawl",
        }
    }
}

impl std::fmt::Display for ArchiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArchiveSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wayback_machine" => Ok(Self::WaybackMachine),
            "common_crawl" => Ok(Self::CommonCrawl),
            other => Err(format!("unknown ArchiveSource: {other}")),
        }
    }
}

/// Which sources a project draws from. `Hybrid` is primary + fallback over
/// both sources ordered by configured priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveSelection {
    WaybackMachine,
    CommonCrawl,
    Hybrid,
}

impl std::fmt::Display for ArchiveSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveSelection::WaybackMachine => write!(f, "wayback_machine"),
            ArchiveSelection::CommonCrawl => write!(f, "common_crawl"),
            ArchiveSelection::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for ArchiveSelection {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wayback_machine" => Ok(Self::WaybackMachine),
            "common_crawl" => Ok(Self::CommonCrawl),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown ArchiveSelection: {other}")),
        }
    }
}

// --- Targets ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    HostExact,
    Subdomain,
    Prefix,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchType::HostExact => write!(f, "host_exact"),
            MatchType::Subdomain => write!(f, "subdomain"),
            MatchType::Prefix => write!(f, "prefix"),
        }
    }
}

impl std::str::FromStr for MatchType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host_exact" => Ok(Self::HostExact),
            "subdomain" => Ok(Self::Subdomain),
            "prefix" => Ok(Self::Prefix),
            other => Err(format!("unknown MatchType: {other}")),
        }
    }
}

/// A (domain, date window) scrape target. The unit the router lists captures
/// for and the filter classifies against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub project_id: Uuid,
    pub domain: String,
    pub match_type: MatchType,
    pub url_path: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub include_attachments: bool,
}

/// Inclusive capture-timestamp window in archive form: from_date·000000 to
/// to_date·235959.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, String> {
        if from > to {
            return Err(format!("from_date {from} is after to_date {to}"));
        }
        Ok(Self { from, to })
    }

    /// Lower bound as a 14-char archive timestamp.
    pub fn from_timestamp(&self) -> String {
        format!("{}000000", self.from.format("%Y%m%d"))
    }

    /// Upper bound as a 14-char archive timestamp.
    pub fn to_timestamp(&self) -> String {
        format!("{}235959", self.to.format("%Y%m%d"))
    }

    pub fn contains(&self, timestamp14: &str) -> bool {
        timestamp14 >= self.from_timestamp().as_str() && timestamp14 <= self.to_timestamp().as_str()
    }
}

/// Validate a 14-char archive timestamp (YYYYMMDDHHMMSS).
pub fn is_valid_timestamp14(ts: &str) -> bool {
    if ts.len() != 14 || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let date_ok = NaiveDate::parse_from_str(&ts[..8], "%Y%m%d").is_ok();
    let hh: u32 = ts[8..10].parse().unwrap_or(99);
    let mm: u32 = ts[10..12].parse().unwrap_or(99);
    let ss: u32 = ts[12..14].parse().unwrap_or(99);
    date_ok && hh < 24 && mm < 60 && ss < 60
}

// --- Captures ---

/// A single archived snapshot of a URL, as listed by a source strategy.
/// Canonical wire shape: stable field names, 14-char timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// 14-char UTC timestamp, YYYYMMDDHHMMSS.
    pub timestamp: String,
    pub original_url: String,
    /// Lowercased.
    pub mime_type: String,
    /// Numeric string, e.g. "200".
    pub status_code: String,
    pub digest: String,
    pub length: u64,
}

impl CaptureRecord {
    /// Dedup identity within a single listing.
    pub fn dedup_key(&self) -> (String, String, String) {
        (
            self.digest.clone(),
            self.timestamp.clone(),
            self.original_url.clone(),
        )
    }
}

// --- ScrapePage statuses ---

/// Closed set of per-capture processing statuses. Clients treat unknown
/// values as opaque; this enum is the single source of truth server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    FilteredListPage,
    FilteredAlreadyProcessed,
    FilteredAttachmentDisabled,
    FilteredFileExtension,
    FilteredSizeTooSmall,
    FilteredSizeTooLarge,
    FilteredLowPriority,
    FilteredCustomRule,
    ManuallySkipped,
    ManuallyApproved,
    AwaitingManualReview,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Pending => "pending",
            PageStatus::InProgress => "in_progress",
            PageStatus::Completed => "completed",
            PageStatus::Failed => "failed",
            PageStatus::FilteredListPage => "filtered_list_page",
            PageStatus::FilteredAlreadyProcessed => "filtered_already_processed",
            PageStatus::FilteredAttachmentDisabled => "filtered_attachment_disabled",
            PageStatus::FilteredFileExtension => "filtered_file_extension",
            PageStatus::FilteredSizeTooSmall => "filtered_size_too_small",
            PageStatus::FilteredSizeTooLarge => "filtered_size_too_large",
            PageStatus::FilteredLowPriority => "filtered_low_priority",
            PageStatus::FilteredCustomRule => "filtered_custom_rule",
            PageStatus::ManuallySkipped => "manually_skipped",
            PageStatus::ManuallyApproved => "manually_approved",
            PageStatus::AwaitingManualReview => "awaiting_manual_review",
        }
    }

    /// All members of the closed set, in declaration order.
    pub fn all() -> &'static [PageStatus] {
        &[
            PageStatus::Pending,
            PageStatus::InProgress,
            PageStatus::Completed,
            PageStatus::Failed,
            PageStatus::FilteredListPage,
            PageStatus::FilteredAlreadyProcessed,
            PageStatus::FilteredAttachmentDisabled,
            PageStatus::FilteredFileExtension,
            PageStatus::FilteredSizeTooSmall,
            PageStatus::FilteredSizeTooLarge,
            PageStatus::FilteredLowPriority,
            PageStatus::FilteredCustomRule,
            PageStatus::ManuallySkipped,
            PageStatus::ManuallyApproved,
            PageStatus::AwaitingManualReview,
        ]
    }

    /// Filter verdicts are terminal except through manual override.
    pub fn is_filtered(&self) -> bool {
        matches!(
            self,
            PageStatus::FilteredListPage
                | PageStatus::FilteredAlreadyProcessed
                | PageStatus::FilteredAttachmentDisabled
                | PageStatus::FilteredFileExtension
                | PageStatus::FilteredSizeTooSmall
                | PageStatus::FilteredSizeTooLarge
                | PageStatus::FilteredLowPriority
                | PageStatus::FilteredCustomRule
        )
    }
}

impl std::fmt::Display for PageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PageStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .find(|v| v.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown PageStatus: {s}"))
    }
}

// --- Filter output ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCategory {
    Technical,
    ContentQuality,
    Duplicate,
    Attachment,
    Size,
    Custom,
    Priority,
}

impl std::fmt::Display for FilterCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterCategory::Technical => write!(f, "technical"),
            FilterCategory::ContentQuality => write!(f, "content_quality"),
            FilterCategory::Duplicate => write!(f, "duplicate"),
            FilterCategory::Attachment => write!(f, "attachment"),
            FilterCategory::Size => write!(f, "size"),
            FilterCategory::Custom => write!(f, "custom"),
            FilterCategory::Priority => write!(f, "priority"),
        }
    }
}

impl std::str::FromStr for FilterCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "technical" => Ok(Self::Technical),
            "content_quality" => Ok(Self::ContentQuality),
            "duplicate" => Ok(Self::Duplicate),
            "attachment" => Ok(Self::Attachment),
            "size" => Ok(Self::Size),
            "custom" => Ok(Self::Custom),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown FilterCategory: {other}")),
        }
    }
}

/// Structured audit trail for a filter decision. Persisted as JSONB on the
/// scrape page; wall-clock-free so reclassification is byte-identical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterDetails {
    pub reason_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_project: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_capture_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_metadata: Option<serde_json::Value>,
}

// --- Sessions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Indexing,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Pending => write!(f, "pending"),
            SessionState::Indexing => write!(f, "indexing"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "indexing" => Ok(Self::Indexing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown SessionState: {other}")),
        }
    }
}

/// Per-session counters, persisted as JSONB and merged additively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub discovered: u64,
    #[serde(default)]
    pub filtered_by_reason: std::collections::BTreeMap<String, u64>,
    pub extracted_ok: u64,
    pub extracted_failed: u64,
}

impl SessionCounters {
    pub fn merge(&mut self, delta: &SessionCounters) {
        self.discovered += delta.discovered;
        self.extracted_ok += delta.extracted_ok;
        self.extracted_failed += delta.extracted_failed;
        for (reason, n) in &delta.filtered_by_reason {
            *self.filtered_by_reason.entry(reason.clone()).or_default() += n;
        }
    }
}

// --- Consistency ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Strong,
    Eventual,
    Weak,
}

impl Default for ConsistencyLevel {
    fn default() -> Self {
        ConsistencyLevel::Eventual
    }
}

impl std::fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyLevel::Strong => write!(f, "strong"),
            ConsistencyLevel::Eventual => write!(f, "eventual"),
            ConsistencyLevel::Weak => write!(f, "weak"),
        }
    }
}

impl std::str::FromStr for ConsistencyLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strong" => Ok(Self::Strong),
            "eventual" => Ok(Self::Eventual),
            "weak" => Ok(Self::Weak),
            other => Err(format!("unknown ConsistencyLevel: {other}")),
        }
    }
}

/// Extracted content produced by the tiered extractor, ready to materialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub original_url: String,
    pub capture_timestamp: String,
    pub content_digest: String,
    pub title: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    pub language: String,
    pub word_count: u32,
    pub char_count: u32,
    pub extraction_method: String,
    pub extraction_confidence: f32,
    pub quality_score: u8,
    pub metadata: serde_json::Value,
}

/// Attachment mime types the pipeline can ingest when a target opts in.
/// Everything else that isn't HTML is dropped at the strategy boundary.
pub const ATTACHMENT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.oasis.opendocument.text",
    "application/rtf",
];

pub fn is_html_mime(mime: &str) -> bool {
    let m = mime.trim().to_ascii_lowercase();
    m.starts_with("text/html") || m.starts_with("application/xhtml")
}

pub fn is_attachment_mime(mime: &str) -> bool {
    let m = mime.trim().to_ascii_lowercase();
    ATTACHMENT_MIME_TYPES.iter().any(|t| m.starts_with(t))
}

/// Timestamp helpers between archive form and chrono.
pub fn parse_timestamp14(ts: &str) -> Option<DateTime<Utc>> {
    if !is_valid_timestamp14(ts) {
        return None;
    }
    chrono::NaiveDateTime::parse_from_str(ts, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_validation() {
        assert!(is_valid_timestamp14("20240315120000"));
        assert!(!is_valid_timestamp14("2024031512000"));
        assert!(!is_valid_timestamp14("20240315126000"));
        assert!(!is_valid_timestamp14("20241315120000"));
        assert!(!is_valid_timestamp14("2024031512000x"));
    }

    #[test]
    fn window_bounds() {
        let w = DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
        assert_eq!(w.from_timestamp(), "20240101000000");
        assert_eq!(w.to_timestamp(), "20240131235959");
        assert!(w.contains("20240115093000"));
        assert!(!w.contains("20240201000000"));
    }

    #[test]
    fn window_rejects_inverted() {
        assert!(DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        )
        .is_err());
    }

    #[test]
    fn status_round_trips() {
        for status in PageStatus::all() {
            let s = status.as_str();
            assert_eq!(s.parse::<PageStatus>().unwrap(), *status);
        }
    }

    #[test]
    fn filtered_statuses() {
        assert!(PageStatus::FilteredListPage.is_filtered());
        assert!(!PageStatus::Pending.is_filtered());
        assert!(!PageStatus::ManuallySkipped.is_filtered());
    }

    #[test]
    fn counters_merge() {
        let mut a = SessionCounters {
            discovered: 10,
            extracted_ok: 2,
            ..Default::default()
        };
        let mut delta = SessionCounters::default();
        delta.discovered = 5;
        delta
            .filtered_by_reason
            .insert("filtered_list_page".into(), 3);
        a.merge(&delta);
        assert_eq!(a.discovered, 15);
        assert_eq!(a.filtered_by_reason["filtered_list_page"], 3);
    }
}
