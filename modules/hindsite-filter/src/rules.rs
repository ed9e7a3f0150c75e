//! Filter rule registry. Rules are explicit `{id, pattern, category,
//! confidence}` entries evaluated in declared order; there is no discovery
//! magic, adding a rule means adding it to the table.

use regex::Regex;

use hindsite_common::FilterCategory;

/// URL path extensions that are never worth a scrape page. Checked first,
/// dropped before persistence.
pub const EXCLUDED_EXTENSIONS: &[&str] = &[
    "css", "js", "mjs", "map", "svg", "ico", "woff", "woff2", "ttf", "eot", "png", "jpg", "jpeg",
    "gif", "webp", "bmp", "avif", "mp4", "mp3", "wav", "avi", "mov", "webm", "zip", "gz", "tar",
    "rar", "7z", "exe", "dmg", "iso",
];

/// A list-page detection rule applied to the URL path.
pub struct ListPageRule {
    pub id: &'static str,
    pub pattern: Regex,
    pub category: FilterCategory,
    pub confidence: f32,
}

/// The declared list-page rules, in evaluation order. First match wins and
/// its pattern string is recorded on the scrape page.
pub fn list_page_rules() -> Vec<ListPageRule> {
    let rule = |id, pattern: &str, confidence| ListPageRule {
        id,
        pattern: Regex::new(pattern).expect("valid list-page pattern"),
        category: FilterCategory::ContentQuality,
        confidence,
    };
    vec![
        rule("blog_pagination", r"/blog/page/\d+", 0.95),
        rule("category_pagination", r"/category/.+/page/\d+", 0.95),
        rule("tag_pagination", r"/tag/.+/page/\d+", 0.95),
        rule("generic_pagination", r"/page/\d+/?$", 0.9),
        rule("query_pagination", r"[?&](page|p|offset|start)=\d+", 0.85),
        rule("date_archive_index", r"/\d{4}/\d{2}/?$", 0.85),
        rule("year_archive_index", r"/\d{4}/?$", 0.8),
        rule("archive_index", r"/(archive|archives)(/|$)", 0.85),
        rule("category_index", r"/(category|categories|tags?|topics?)/[^/]+/?$", 0.8),
        rule("author_index", r"/(author|contributors?)/[^/]+/?$", 0.8),
        rule("feed_index", r"/(feed|rss|atom)(/|$|\.xml$)", 0.9),
        rule("sitemap", r"/sitemap[^/]*\.xml$", 0.95),
    ]
}

/// Project-configured custom rule. Compiled once at load; invalid patterns
/// are rejected at the API boundary, not here.
#[derive(Debug, Clone)]
pub struct CustomRule {
    pub id: String,
    pub pattern: String,
}

pub struct CompiledCustomRule {
    pub id: String,
    pub pattern: Regex,
}

pub fn compile_custom_rules(rules: &[CustomRule]) -> Vec<CompiledCustomRule> {
    rules
        .iter()
        .filter_map(|r| {
            Regex::new(&r.pattern)
                .map(|pattern| CompiledCustomRule {
                    id: r.id.clone(),
                    pattern,
                })
                .ok()
        })
        .collect()
}

/// Extension of the URL path, lowercased, if any.
pub fn path_extension(url: &str) -> Option<String> {
    let path = url::Url::parse(url).ok().map(|u| u.path().to_string())?;
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_excluded_extension(url: &str) -> Option<String> {
    let ext = path_extension(url)?;
    EXCLUDED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_extraction() {
        assert_eq!(
            path_extension("https://example.com/assets/site.css?v=3"),
            Some("css".into())
        );
        assert_eq!(path_extension("https://example.com/article"), None);
        assert_eq!(
            path_extension("https://example.com/doc.PDF"),
            Some("pdf".into())
        );
    }

    #[test]
    fn excluded_extensions_match() {
        assert!(is_excluded_extension("https://example.com/app.js").is_some());
        assert!(is_excluded_extension("https://example.com/logo.png").is_some());
        assert!(is_excluded_extension("https://example.com/report.pdf").is_none());
        assert!(is_excluded_extension("https://example.com/about").is_none());
    }

    #[test]
    fn list_page_rules_compile_in_order() {
        let rules = list_page_rules();
        assert!(rules.len() >= 10);
        assert_eq!(rules[0].id, "blog_pagination");
        assert!(rules[0].pattern.is_match("/blog/page/3"));
        assert!(rules
            .iter()
            .find(|r| r.id == "category_pagination")
            .unwrap()
            .pattern
            .is_match("/category/news/page/12"));
    }

    #[test]
    fn custom_rules_skip_invalid_patterns() {
        let compiled = compile_custom_rules(&[
            CustomRule {
                id: "good".into(),
                pattern: r"/private/".into(),
            },
            CustomRule {
                id: "bad".into(),
                pattern: r"(unclosed".into(),
            },
        ]);
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].id, "good");
    }
}
