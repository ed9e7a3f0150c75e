//! Request validation. Bodies are strict: unknown fields are rejected by
//! serde, enums are rejected with structured {field, message, code} errors,
//! and the legacy `commoncrawl` spelling is refused rather than aliased.

use serde::{Deserialize, Serialize};

use hindsite_common::{
    ArchivePolicy, ArchiveSelection, ConsistencyLevel, FallbackStrategy, MatchType, SourceConfig,
};

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>, code: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            code: code.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateProjectBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub archive_source: Option<String>,
    #[serde(default)]
    pub fallback_enabled: Option<bool>,
    #[serde(default)]
    pub archive_config: Option<ArchiveConfigBody>,
    #[serde(default)]
    pub consistency_level: Option<String>,
    #[serde(default)]
    pub targets: Vec<TargetBody>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchProjectBody {
    #[serde(default)]
    pub archive_source: Option<String>,
    #[serde(default)]
    pub fallback_enabled: Option<bool>,
    #[serde(default)]
    pub archive_config: Option<ArchiveConfigBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfigBody {
    #[serde(default)]
    pub fallback_strategy: Option<String>,
    #[serde(default)]
    pub fallback_delay_seconds: Option<f64>,
    #[serde(default)]
    pub exponential_backoff: Option<bool>,
    #[serde(default)]
    pub max_fallback_delay: Option<f64>,
    #[serde(default)]
    pub wayback_machine: Option<SourceConfigBody>,
    #[serde(default)]
    pub common_crawl: Option<SourceConfigBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfigBody {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub include_attachments: Option<bool>,
    #[serde(default)]
    pub priority: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetBody {
    pub domain: String,
    #[serde(default)]
    pub match_type: Option<String>,
    #[serde(default)]
    pub url_path: Option<String>,
    pub from_date: chrono::NaiveDate,
    pub to_date: chrono::NaiveDate,
    #[serde(default)]
    pub include_attachments: Option<bool>,
}

/// Parse the archive_source enum. The legacy `commoncrawl` spelling gets a
/// dedicated error code instead of silent aliasing.
pub fn parse_archive_source(raw: &str, field: &str) -> Result<ArchiveSelection, FieldError> {
    if raw == "commoncrawl" {
        return Err(FieldError::new(
            field,
            "use \"common_crawl\"; the \"commoncrawl\" spelling is not accepted",
            "legacy_enum_spelling",
        ));
    }
    raw.parse()
        .map_err(|_| FieldError::new(field, format!("unknown archive source: {raw}"), "invalid_enum"))
}

/// Resolve a full archive policy from the request, applying defaults and
/// range validation. Collects every field error rather than stopping at the
/// first.
pub fn resolve_policy(
    archive_source: Option<&str>,
    fallback_enabled: Option<bool>,
    config: Option<&ArchiveConfigBody>,
    errors: &mut Vec<FieldError>,
) -> ArchivePolicy {
    let mut policy = ArchivePolicy::default();

    if let Some(raw) = archive_source {
        match parse_archive_source(raw, "archive_source") {
            Ok(selection) => policy.archive_source = selection,
            Err(e) => errors.push(e),
        }
    }
    if let Some(enabled) = fallback_enabled {
        policy.fallback_enabled = enabled;
    }

    if let Some(config) = config {
        if let Some(raw) = &config.fallback_strategy {
            match raw.parse::<FallbackStrategy>() {
                Ok(strategy) => policy.fallback_strategy = strategy,
                Err(_) => errors.push(FieldError::new(
                    "archive_config.fallback_strategy",
                    format!("unknown fallback strategy: {raw}"),
                    "invalid_enum",
                )),
            }
        }
        if let Some(delay) = config.fallback_delay_seconds {
            policy.fallback_delay_seconds = delay;
        }
        if let Some(backoff) = config.exponential_backoff {
            policy.exponential_backoff = backoff;
        }
        if let Some(max_delay) = config.max_fallback_delay {
            policy.max_fallback_delay = max_delay;
        }
        if let Some(body) = &config.wayback_machine {
            apply_source_config(&mut policy.wayback_machine, body);
        }
        if let Some(body) = &config.common_crawl {
            apply_source_config(&mut policy.common_crawl, body);
        }
    }

    if let Err(message) = policy.validate() {
        errors.push(FieldError::new("archive_config", message, "out_of_range"));
    }

    policy
}

fn apply_source_config(config: &mut SourceConfig, body: &SourceConfigBody) {
    if let Some(enabled) = body.enabled {
        config.enabled = enabled;
    }
    if let Some(timeout) = body.timeout_seconds {
        config.timeout_seconds = timeout;
    }
    if let Some(retries) = body.max_retries {
        config.max_retries = retries;
    }
    if let Some(page_size) = body.page_size {
        config.page_size = page_size;
    }
    if let Some(max_pages) = body.max_pages {
        config.max_pages = max_pages;
    }
    if let Some(attachments) = body.include_attachments {
        config.include_attachments = attachments;
    }
    if let Some(priority) = body.priority {
        config.priority = priority;
    }
}

pub fn validate_target(target: &TargetBody, index: usize, errors: &mut Vec<FieldError>) {
    let prefix = format!("targets[{index}]");
    if target.domain.trim().is_empty() || target.domain.contains('/') {
        errors.push(FieldError::new(
            &format!("{prefix}.domain"),
            "domain must be a bare host name",
            "invalid_domain",
        ));
    }
    if target.from_date > target.to_date {
        errors.push(FieldError::new(
            &format!("{prefix}.from_date"),
            "from_date must not be after to_date",
            "invalid_date_window",
        ));
    }
    match target.match_type.as_deref() {
        None => {}
        Some(raw) => match raw.parse::<MatchType>() {
            Ok(MatchType::Prefix) => {
                if target.url_path.as_deref().unwrap_or("").is_empty() {
                    errors.push(FieldError::new(
                        &format!("{prefix}.url_path"),
                        "match_type \"prefix\" requires a non-empty url_path",
                        "missing_url_path",
                    ));
                }
            }
            Ok(_) => {}
            Err(_) => errors.push(FieldError::new(
                &format!("{prefix}.match_type"),
                format!("unknown match type: {raw}"),
                "invalid_enum",
            )),
        },
    }
}

pub fn parse_consistency(
    raw: Option<&str>,
    errors: &mut Vec<FieldError>,
) -> ConsistencyLevel {
    match raw {
        None => ConsistencyLevel::default(),
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            errors.push(FieldError::new(
                "consistency_level",
                format!("unknown consistency level: {raw}"),
                "invalid_enum",
            ));
            ConsistencyLevel::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_spelling_rejected() {
        let err = parse_archive_source("commoncrawl", "archive_source").unwrap_err();
        assert_eq!(err.code, "legacy_enum_spelling");
        assert!(parse_archive_source("common_crawl", "archive_source").is_ok());
        assert!(parse_archive_source("wayback_machine", "archive_source").is_ok());
        assert!(parse_archive_source("hybrid", "archive_source").is_ok());
    }

    #[test]
    fn unknown_body_fields_rejected() {
        let raw = serde_json::json!({
            "name": "p",
            "surprise": true,
        });
        let parsed: Result<CreateProjectBody, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn hybrid_without_fallback_collects_error() {
        let mut errors = Vec::new();
        resolve_policy(Some("hybrid"), Some(false), None, &mut errors);
        assert!(errors.iter().any(|e| e.code == "out_of_range"));
    }

    #[test]
    fn prefix_target_requires_path() {
        let mut errors = Vec::new();
        validate_target(
            &TargetBody {
                domain: "example.com".into(),
                match_type: Some("prefix".into()),
                url_path: None,
                from_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                to_date: chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                include_attachments: None,
            },
            0,
            &mut errors,
        );
        assert!(errors.iter().any(|e| e.code == "missing_url_path"));
    }

    #[test]
    fn inverted_window_rejected() {
        let mut errors = Vec::new();
        validate_target(
            &TargetBody {
                domain: "example.com".into(),
                match_type: None,
                url_path: None,
                from_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                to_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                include_attachments: None,
            },
            0,
            &mut errors,
        );
        assert!(errors.iter().any(|e| e.code == "invalid_date_window"));
    }

    #[test]
    fn source_config_bounds_enforced() {
        let mut errors = Vec::new();
        let config = ArchiveConfigBody {
            wayback_machine: Some(SourceConfigBody {
                page_size: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        resolve_policy(Some("wayback_machine"), None, Some(&config), &mut errors);
        assert!(errors.iter().any(|e| e.code == "out_of_range"));
    }
}
