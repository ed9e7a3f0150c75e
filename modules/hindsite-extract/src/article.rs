//! Middle tier: article-container heuristics over the DOM. Looks for the
//! densest article-shaped container and takes its paragraphs. Persisted
//! method label: "newspaper".

use scraper::{Html, Selector};

use crate::dom::{extract_metadata, extract_title};
use crate::error::ExtractError;
use crate::language::detect_language;
use crate::strategy::{tidy_text, word_count, ExtractionResult, ExtractionStrategy};

/// Containers tried in order; the first one with enough paragraph text wins.
const CONTAINER_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    ".post-content",
    ".article-body",
    ".entry-content",
    "#content",
    ".content",
];

pub struct ArticleStrategy;

impl ArticleStrategy {
    fn paragraphs_text(container: scraper::ElementRef<'_>) -> String {
        let p = Selector::parse("p, h1, h2, h3, li, blockquote").expect("valid selector");
        let mut chunks = Vec::new();
        for el in container.select(&p) {
            let text: String = el.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !text.is_empty() {
                chunks.push(text);
            }
        }
        chunks.join("\n\n")
    }
}

impl ExtractionStrategy for ArticleStrategy {
    fn name(&self) -> &'static str {
        "newspaper"
    }

    fn f1_hint(&self) -> f32 {
        0.912
    }

    fn extract(&self, html: &[u8], _url: &str) -> Result<ExtractionResult, ExtractError> {
        let html_str = String::from_utf8_lossy(html);
        let doc = Html::parse_document(&html_str);

        let mut best_text = String::new();
        for css in CONTAINER_SELECTORS {
            let Ok(sel) = Selector::parse(css) else {
                continue;
            };
            for container in doc.select(&sel) {
                let text = Self::paragraphs_text(container);
                if word_count(&text) > word_count(&best_text) {
                    best_text = text;
                }
            }
            // A decisive container ends the search; later selectors are
            // fallbacks, not competitors.
            if word_count(&best_text) >= 50 {
                break;
            }
        }

        let text = tidy_text(&best_text);
        let words = word_count(&text);
        if words == 0 {
            return Err(ExtractError::SoftFail(
                "no article-shaped container found".into(),
            ));
        }

        let title = extract_title(&doc);
        let metadata = extract_metadata(&doc);
        let meta_bonus = if metadata.as_object().is_some_and(|m| m.len() >= 2) {
            0.05
        } else {
            0.0
        };

        let confidence = (0.45
            + (words as f32 / 600.0).min(0.35)
            + if title.is_empty() { 0.0 } else { 0.05 }
            + meta_bonus)
            .min(0.9);

        Ok(ExtractionResult {
            method: self.name().to_string(),
            title,
            language: detect_language(&text),
            word_count: words,
            char_count: text.chars().count() as u32,
            text,
            markdown: None,
            metadata,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_article_container() {
        let html = r#"<html><head><title>Launch Day</title></head><body>
            <nav><a href="/">Home</a><a href="/about">About</a></nav>
            <article>
                <h1>Launch Day</h1>
                <p>Today we are shipping the thing we have worked on for a year.</p>
                <p>It took longer than expected but the result is worth the wait.</p>
            </article>
            <footer>Copyright</footer>
        </body></html>"#;
        let result = ArticleStrategy.extract(html.as_bytes(), "https://example.com/post").unwrap();
        assert_eq!(result.method, "newspaper");
        assert!(result.text.contains("shipping the thing"));
        assert!(!result.text.contains("Copyright"));
        assert!(!result.text.contains("Home"));
        assert_eq!(result.title, "Launch Day");
    }

    #[test]
    fn soft_fails_on_empty_page() {
        let html = "<html><body><nav>menu</nav></body></html>";
        let err = ArticleStrategy
            .extract(html.as_bytes(), "https://example.com/")
            .unwrap_err();
        assert!(matches!(err, ExtractError::SoftFail(_)));
    }
}
