//! Deterministic priority scoring for discovered captures. Pure function of
//! URL and mime type; the same inputs always produce the same score.

const BASELINE: i32 = 5;

const ARTICLE_TOKENS: &[&str] = &[
    "article", "articles", "post", "posts", "blog", "news", "story", "stories", "press",
];

const TRACKING_PARAMS: &[&str] = &["utm_", "fbclid", "gclid", "mc_cid", "ref="];

/// Score a capture's processing priority in [1, 10].
///
/// Shallow, article-looking URLs rise; paginated and query-heavy URLs sink.
pub fn priority_score(original_url: &str, mime_type: &str) -> u8 {
    let mut score = BASELINE;

    let (path, query) = split_url(original_url);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // Shallow pages tend to be the ones worth reading.
    if segments.len() <= 1 {
        score += 1;
    }

    if segments
        .iter()
        .any(|s| ARTICLE_TOKENS.contains(&s.to_ascii_lowercase().as_str()))
    {
        score += 2;
    }

    // Dated permalinks (/2024/03/slug) are usually articles.
    if has_date_segments(&segments) && segments.len() >= 3 {
        score += 1;
    }

    // Pagination hints.
    if path.contains("/page/")
        || query.contains("page=")
        || query.contains("offset=")
        || query.contains("start=")
    {
        score -= 2;
    }

    match query.len() {
        0 => {}
        1..=20 => {}
        21..=50 => score -= 1,
        _ => score -= 2,
    }

    if TRACKING_PARAMS.iter().any(|p| query.contains(p)) {
        score -= 1;
    }

    if !hindsite_common::is_html_mime(mime_type) {
        score -= 1;
    }

    score.clamp(1, 10) as u8
}

fn split_url(url: &str) -> (String, String) {
    match url::Url::parse(url) {
        Ok(u) => (
            u.path().to_string(),
            u.query().unwrap_or_default().to_string(),
        ),
        Err(_) => {
            let without_scheme = url.split("://").nth(1).unwrap_or(url);
            let path_start = without_scheme.find('/').unwrap_or(without_scheme.len());
            let rest = &without_scheme[path_start..];
            match rest.split_once('?') {
                Some((p, q)) => (p.to_string(), q.to_string()),
                None => (rest.to_string(), String::new()),
            }
        }
    }
}

fn has_date_segments(segments: &[&str]) -> bool {
    segments.windows(2).any(|w| {
        w[0].len() == 4
            && w[0].bytes().all(|b| b.is_ascii_digit())
            && w[1].len() == 2
            && w[1].bytes().all(|b| b.is_ascii_digit())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_for_plain_page() {
        // Two segments, no tokens, no query: stays at baseline.
        assert_eq!(priority_score("https://example.com/about/team", "text/html"), 5);
    }

    #[test]
    fn article_paths_score_high() {
        let score = priority_score("https://example.com/blog/2024/03/launch-post", "text/html");
        assert!(score >= 7, "dated blog permalink should rise, got {score}");
    }

    #[test]
    fn pagination_scores_low() {
        let listing = priority_score("https://example.com/blog/page/4", "text/html");
        let article = priority_score("https://example.com/blog/launch-post", "text/html");
        assert!(listing < article);
    }

    #[test]
    fn long_query_strings_sink() {
        let clean = priority_score("https://example.com/news/story", "text/html");
        let tracked = priority_score(
            "https://example.com/news/story?utm_source=newsletter&utm_medium=email&utm_campaign=spring",
            "text/html",
        );
        assert!(tracked < clean);
    }

    #[test]
    fn deterministic() {
        let url = "https://example.com/articles/some-piece?ref=home";
        assert_eq!(
            priority_score(url, "text/html"),
            priority_score(url, "text/html")
        );
    }

    #[test]
    fn clamped_to_range() {
        let worst = priority_score(
            "https://example.com/page/9?page=9&start=100&utm_source=x&very=long&query=string&that=keeps&going=on",
            "application/pdf",
        );
        assert!((1..=10).contains(&worst));
        let best = priority_score("https://example.com/news", "text/html");
        assert!((1..=10).contains(&best));
    }
}
