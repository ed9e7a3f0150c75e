//! Capture classification. Every discovered capture gets a status with a
//! specific, auditable reason; rule order is contractual and first match
//! wins.

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use hindsite_common::{
    is_attachment_mime, CaptureRecord, FilterCategory, FilterDetails, PageStatus, Target,
};

use crate::priority::priority_score;
use crate::rules::{
    compile_custom_rules, is_excluded_extension, list_page_rules, CompiledCustomRule, CustomRule,
    ListPageRule,
};

/// Size bounds and the low-priority cutoff. Per-project overrides come from
/// the API; the defaults match a "skip trackers and tarballs" posture.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Captures smaller than this are skipped (bytes).
    pub min_size: u64,
    /// Captures larger than this are skipped (bytes).
    pub max_size: u64,
    /// Scores at or below this threshold are filtered as low priority.
    pub low_priority_threshold: u8,
    pub custom_rules: Vec<CustomRule>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_size: 256,
            max_size: 10 * 1024 * 1024,
            low_priority_threshold: 2,
            custom_rules: Vec::new(),
        }
    }
}

/// A previously materialized page found by digest. `capture_timestamp` is the
/// original capture the content came from.
#[derive(Debug, Clone)]
pub struct ProcessedPage {
    pub page_id: Uuid,
    pub project_id: Uuid,
    pub capture_timestamp: Option<String>,
}

/// Duplicate lookup against the page store. A trait so the filter tests run
/// without a database.
#[async_trait]
pub trait PageLookup: Send + Sync {
    /// Find content already processed for this project by capture digest.
    async fn find_processed(
        &self,
        project_id: Uuid,
        digest: &str,
    ) -> anyhow::Result<Option<ProcessedPage>>;
}

/// No-op lookup for contexts where duplicate detection is disabled.
pub struct NoPageLookup;

#[async_trait]
impl PageLookup for NoPageLookup {
    async fn find_processed(
        &self,
        _project_id: Uuid,
        _digest: &str,
    ) -> anyhow::Result<Option<ProcessedPage>> {
        Ok(None)
    }
}

/// The filter's full output for one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: PageStatus,
    pub filter_reason: Option<String>,
    pub filter_category: Option<FilterCategory>,
    pub details: Option<FilterDetails>,
    pub matched_pattern: Option<String>,
    pub filter_confidence: Option<f32>,
    pub priority_score: u8,
    pub can_be_manually_processed: bool,
    pub related_page_id: Option<Uuid>,
}

impl Classification {
    fn passed(priority: u8) -> Self {
        Self {
            status: PageStatus::Pending,
            filter_reason: None,
            filter_category: None,
            details: None,
            matched_pattern: None,
            filter_confidence: None,
            priority_score: priority,
            can_be_manually_processed: false,
            related_page_id: None,
        }
    }
}

/// What to do with a capture.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    /// Excluded file extension: no scrape page is persisted at all.
    Drop { extension: String },
    /// Manual override in place: leave the existing record untouched.
    PreserveOverride,
    /// Persist with this classification.
    Classified(Classification),
}

pub struct CaptureFilter {
    rules: Vec<ListPageRule>,
}

impl CaptureFilter {
    pub fn new() -> Self {
        Self {
            rules: list_page_rules(),
        }
    }

    /// Classify one capture. Idempotent: the same capture and config yield an
    /// identical verdict, so reclassification never churns persisted rows.
    pub async fn classify(
        &self,
        capture: &CaptureRecord,
        target: &Target,
        config: &FilterConfig,
        lookup: &dyn PageLookup,
        manually_overridden: bool,
    ) -> anyhow::Result<FilterVerdict> {
        // An override freezes the record; reclassification never touches it.
        if manually_overridden {
            return Ok(FilterVerdict::PreserveOverride);
        }

        // 1. File extension exclusion: dropped before persistence.
        if let Some(extension) = is_excluded_extension(&capture.original_url) {
            debug!(url = %capture.original_url, extension, "Capture dropped by extension");
            return Ok(FilterVerdict::Drop { extension });
        }

        let priority = priority_score(&capture.original_url, &capture.mime_type);

        // 2. Attachments on a target that opted out.
        if is_attachment_mime(&capture.mime_type) && !target.include_attachments {
            return Ok(FilterVerdict::Classified(Classification {
                status: PageStatus::FilteredAttachmentDisabled,
                filter_reason: Some("attachment_disabled".into()),
                filter_category: Some(FilterCategory::Attachment),
                details: Some(FilterDetails {
                    reason_text: "attachments disabled for this target".into(),
                    confidence: 1.0,
                    file_type: Some(capture.mime_type.clone()),
                    file_size: Some(capture.length),
                    ..FilterDetails::default()
                }),
                matched_pattern: None,
                filter_confidence: Some(1.0),
                priority_score: priority,
                can_be_manually_processed: true,
                related_page_id: None,
            }));
        }

        // 3. Size bounds.
        if capture.length > 0 && capture.length < config.min_size {
            return Ok(FilterVerdict::Classified(size_classification(
                PageStatus::FilteredSizeTooSmall,
                "size_too_small",
                format!(
                    "capture is {} bytes, below the {} byte minimum",
                    capture.length, config.min_size
                ),
                capture.length,
                priority,
            )));
        }
        if capture.length > config.max_size {
            return Ok(FilterVerdict::Classified(size_classification(
                PageStatus::FilteredSizeTooLarge,
                "size_too_large",
                format!(
                    "capture is {} bytes, above the {} byte maximum",
                    capture.length, config.max_size
                ),
                capture.length,
                priority,
            )));
        }

        // 4. Already processed: digest hit in the page store.
        if !capture.digest.is_empty() {
            if let Some(existing) = lookup
                .find_processed(target.project_id, &capture.digest)
                .await?
            {
                return Ok(FilterVerdict::Classified(Classification {
                    status: PageStatus::FilteredAlreadyProcessed,
                    filter_reason: Some("already_processed".into()),
                    filter_category: Some(FilterCategory::Duplicate),
                    details: Some(FilterDetails {
                        reason_text: "content already processed".into(),
                        confidence: 1.0,
                        original_project: Some(existing.project_id),
                        original_capture_timestamp: existing.capture_timestamp.clone(),
                        ..FilterDetails::default()
                    }),
                    matched_pattern: None,
                    filter_confidence: Some(1.0),
                    priority_score: priority,
                    can_be_manually_processed: true,
                    related_page_id: Some(existing.page_id),
                }));
            }
        }

        // 5. List-page patterns over the URL path, declared order.
        let path_and_query = path_with_query(&capture.original_url);
        for rule in &self.rules {
            if rule.pattern.is_match(&path_and_query) {
                return Ok(FilterVerdict::Classified(Classification {
                    status: PageStatus::FilteredListPage,
                    filter_reason: Some("list_page".into()),
                    filter_category: Some(rule.category),
                    details: Some(FilterDetails {
                        reason_text: "list page pattern".into(),
                        matched_pattern: Some(rule.pattern.as_str().to_string()),
                        confidence: rule.confidence,
                        rule_id: Some(rule.id.to_string()),
                        ..FilterDetails::default()
                    }),
                    matched_pattern: Some(rule.pattern.as_str().to_string()),
                    filter_confidence: Some(rule.confidence),
                    priority_score: priority,
                    can_be_manually_processed: true,
                    related_page_id: None,
                }));
            }
        }

        // 6. Project custom rules.
        let custom = compile_custom_rules(&config.custom_rules);
        if let Some(matched) = first_custom_match(&custom, &capture.original_url) {
            return Ok(FilterVerdict::Classified(Classification {
                status: PageStatus::FilteredCustomRule,
                filter_reason: Some("custom_rule".into()),
                filter_category: Some(FilterCategory::Custom),
                details: Some(FilterDetails {
                    reason_text: format!("matched custom rule {}", matched.0),
                    matched_pattern: Some(matched.1.clone()),
                    confidence: 0.9,
                    rule_id: Some(matched.0.clone()),
                    ..FilterDetails::default()
                }),
                matched_pattern: Some(matched.1),
                filter_confidence: Some(0.9),
                priority_score: priority,
                can_be_manually_processed: true,
                related_page_id: None,
            }));
        }

        // 7. Low priority.
        if priority <= config.low_priority_threshold {
            return Ok(FilterVerdict::Classified(Classification {
                status: PageStatus::FilteredLowPriority,
                filter_reason: Some("low_priority".into()),
                filter_category: Some(FilterCategory::Priority),
                details: Some(FilterDetails {
                    reason_text: format!(
                        "priority score {priority} at or below threshold {}",
                        config.low_priority_threshold
                    ),
                    confidence: 0.7,
                    ..FilterDetails::default()
                }),
                matched_pattern: None,
                filter_confidence: Some(0.7),
                priority_score: priority,
                can_be_manually_processed: true,
                related_page_id: None,
            }));
        }

        // 8. Default pass.
        Ok(FilterVerdict::Classified(Classification::passed(priority)))
    }
}

impl Default for CaptureFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn size_classification(
    status: PageStatus,
    reason: &str,
    reason_text: String,
    file_size: u64,
    priority: u8,
) -> Classification {
    Classification {
        status,
        filter_reason: Some(reason.into()),
        filter_category: Some(FilterCategory::Size),
        details: Some(FilterDetails {
            reason_text,
            confidence: 1.0,
            file_size: Some(file_size),
            ..FilterDetails::default()
        }),
        matched_pattern: None,
        filter_confidence: Some(1.0),
        priority_score: priority,
        can_be_manually_processed: true,
        related_page_id: None,
    }
}

fn first_custom_match(rules: &[CompiledCustomRule], url: &str) -> Option<(String, String)> {
    rules
        .iter()
        .find(|r| r.pattern.is_match(url))
        .map(|r| (r.id.clone(), r.pattern.as_str().to_string()))
}

fn path_with_query(original_url: &str) -> String {
    match url::Url::parse(original_url) {
        Ok(u) => match u.query() {
            Some(q) => format!("{}?{}", u.path(), q),
            None => u.path().to_string(),
        },
        Err(_) => original_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn target(include_attachments: bool) -> Target {
        Target {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            domain: "example.com".into(),
            match_type: hindsite_common::MatchType::HostExact,
            url_path: None,
            from_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            to_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            include_attachments,
        }
    }

    fn capture(url: &str, mime: &str, length: u64) -> CaptureRecord {
        CaptureRecord {
            timestamp: "20240315120000".into(),
            original_url: url.into(),
            mime_type: mime.into(),
            status_code: "200".into(),
            digest: "3f2a1b9c".into(),
            length,
        }
    }

    struct FixedLookup(Option<ProcessedPage>);

    #[async_trait]
    impl PageLookup for FixedLookup {
        async fn find_processed(
            &self,
            _project_id: Uuid,
            _digest: &str,
        ) -> anyhow::Result<Option<ProcessedPage>> {
            Ok(self.0.clone())
        }
    }

    async fn classify(
        capture: &CaptureRecord,
        target: &Target,
        lookup: &dyn PageLookup,
    ) -> FilterVerdict {
        CaptureFilter::new()
            .classify(capture, target, &FilterConfig::default(), lookup, false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn excluded_extension_drops_entirely() {
        let verdict = classify(
            &capture("https://example.com/site.css", "text/css", 900),
            &target(false),
            &NoPageLookup,
        )
        .await;
        assert_eq!(
            verdict,
            FilterVerdict::Drop {
                extension: "css".into()
            }
        );
    }

    #[tokio::test]
    async fn attachment_disabled_beats_list_page_pattern() {
        // A PDF living under a pagination path: attachment rule fires first.
        let verdict = classify(
            &capture(
                "https://example.com/blog/page/3/report.pdf",
                "application/pdf",
                50_000,
            ),
            &target(false),
            &NoPageLookup,
        )
        .await;
        let FilterVerdict::Classified(c) = verdict else {
            panic!("expected classification");
        };
        assert_eq!(c.status, PageStatus::FilteredAttachmentDisabled);
        assert_eq!(c.filter_confidence, Some(1.0));
        assert!(c.can_be_manually_processed);
        let details = c.details.unwrap();
        assert_eq!(details.file_type.as_deref(), Some("application/pdf"));
        assert_eq!(details.file_size, Some(50_000));
    }

    #[tokio::test]
    async fn attachment_allowed_when_target_opts_in() {
        let verdict = classify(
            &capture("https://example.com/report.pdf", "application/pdf", 50_000),
            &target(true),
            &NoPageLookup,
        )
        .await;
        let FilterVerdict::Classified(c) = verdict else {
            panic!("expected classification");
        };
        assert_ne!(c.status, PageStatus::FilteredAttachmentDisabled);
    }

    #[tokio::test]
    async fn size_bounds() {
        let small = classify(
            &capture("https://example.com/article/tiny", "text/html", 100),
            &target(false),
            &NoPageLookup,
        )
        .await;
        let FilterVerdict::Classified(c) = small else {
            panic!()
        };
        assert_eq!(c.status, PageStatus::FilteredSizeTooSmall);

        let big = classify(
            &capture(
                "https://example.com/article/huge",
                "text/html",
                20 * 1024 * 1024,
            ),
            &target(false),
            &NoPageLookup,
        )
        .await;
        let FilterVerdict::Classified(c) = big else {
            panic!()
        };
        assert_eq!(c.status, PageStatus::FilteredSizeTooLarge);
    }

    #[tokio::test]
    async fn duplicate_links_related_page() {
        let page_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        let lookup = FixedLookup(Some(ProcessedPage {
            page_id,
            project_id,
            capture_timestamp: Some("20240101000000".into()),
        }));
        let verdict = classify(
            &capture("https://example.com/article", "text/html", 5_000),
            &target(false),
            &lookup,
        )
        .await;
        let FilterVerdict::Classified(c) = verdict else {
            panic!()
        };
        assert_eq!(c.status, PageStatus::FilteredAlreadyProcessed);
        assert_eq!(c.related_page_id, Some(page_id));
        assert_eq!(c.filter_confidence, Some(1.0));
        let details = c.details.unwrap();
        assert!(details.reason_text.contains("already processed"));
        assert_eq!(details.original_project, Some(project_id));
        assert_eq!(
            details.original_capture_timestamp.as_deref(),
            Some("20240101000000")
        );
    }

    #[tokio::test]
    async fn list_page_pattern_sets_matched_pattern() {
        let verdict = classify(
            &capture("https://example.com/blog/page/7", "text/html", 5_000),
            &target(false),
            &NoPageLookup,
        )
        .await;
        let FilterVerdict::Classified(c) = verdict else {
            panic!()
        };
        assert_eq!(c.status, PageStatus::FilteredListPage);
        assert_eq!(c.filter_category, Some(FilterCategory::ContentQuality));
        assert!(c.matched_pattern.is_some());
        let details = c.details.unwrap();
        assert_eq!(details.reason_text, "list page pattern");
        assert!((0.8..=0.95).contains(&details.confidence));
    }

    #[tokio::test]
    async fn custom_rule_fires_with_rule_id() {
        let mut config = FilterConfig::default();
        config.custom_rules.push(CustomRule {
            id: "no_drafts".into(),
            pattern: r"/drafts/".into(),
        });
        let verdict = CaptureFilter::new()
            .classify(
                &capture("https://example.com/drafts/wip-article", "text/html", 5_000),
                &target(false),
                &config,
                &NoPageLookup,
                false,
            )
            .await
            .unwrap();
        let FilterVerdict::Classified(c) = verdict else {
            panic!()
        };
        assert_eq!(c.status, PageStatus::FilteredCustomRule);
        assert_eq!(c.details.unwrap().rule_id.as_deref(), Some("no_drafts"));
    }

    #[tokio::test]
    async fn default_pass_is_pending_with_priority() {
        let verdict = classify(
            &capture("https://example.com/articles/big-launch", "text/html", 5_000),
            &target(false),
            &NoPageLookup,
        )
        .await;
        let FilterVerdict::Classified(c) = verdict else {
            panic!()
        };
        assert_eq!(c.status, PageStatus::Pending);
        assert!(c.filter_reason.is_none());
        assert!(c.priority_score >= 5);
    }

    #[tokio::test]
    async fn override_preserved() {
        let verdict = CaptureFilter::new()
            .classify(
                &capture("https://example.com/blog/page/7", "text/html", 5_000),
                &target(false),
                &FilterConfig::default(),
                &NoPageLookup,
                true,
            )
            .await
            .unwrap();
        assert_eq!(verdict, FilterVerdict::PreserveOverride);
    }

    #[tokio::test]
    async fn classification_is_idempotent() {
        let cap = capture("https://example.com/blog/page/7", "text/html", 5_000);
        let t = target(false);
        let first = classify(&cap, &t, &NoPageLookup).await;
        let second = classify(&cap, &t, &NoPageLookup).await;
        assert_eq!(first, second);
    }
}
