//! Last-resort tier: whole-DOM text with scripts and styles stripped. Always
//! produces something for an HTML page, at low confidence. Persisted method
//! label: "beautifulsoup".

use scraper::{Html, Selector};

use crate::dom::{extract_metadata, extract_title};
use crate::error::ExtractError;
use crate::language::detect_language;
use crate::strategy::{tidy_text, word_count, ExtractionResult, ExtractionStrategy};

pub struct SoupStrategy;

impl ExtractionStrategy for SoupStrategy {
    fn name(&self) -> &'static str {
        "beautifulsoup"
    }

    fn f1_hint(&self) -> f32 {
        0.75
    }

    fn extract(&self, html: &[u8], _url: &str) -> Result<ExtractionResult, ExtractError> {
        let html_str = String::from_utf8_lossy(html);
        let doc = Html::parse_document(&html_str);

        let body = Selector::parse("body").expect("valid selector");

        let text = match doc.select(&body).next() {
            Some(body_el) => {
                // Walk text nodes, skipping script/style/noscript subtrees.
                let mut kept = String::new();
                for node in body_el.descendants() {
                    let scraper::node::Node::Text(text) = node.value() else {
                        continue;
                    };
                    let skipped = node.ancestors().any(|a| {
                        matches!(
                            a.value(),
                            scraper::node::Node::Element(el)
                                if matches!(el.name(), "script" | "style" | "noscript" | "template")
                        )
                    });
                    if skipped {
                        continue;
                    }
                    kept.push_str(text);
                    kept.push('\n');
                }
                kept
            }
            None => String::new(),
        };

        let text = tidy_text(&text);
        let words = word_count(&text);
        if words == 0 {
            return Err(ExtractError::SoftFail("document has no text".into()));
        }

        let title = extract_title(&doc);
        let metadata = extract_metadata(&doc);
        let confidence = (0.25 + (words as f32 / 800.0).min(0.35)).min(0.6);

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
    fn strips_scripts_and_styles() {
        let html = r#"<html><body>
            <script>var x = "should not appear";</script>
            <style>.hidden { display: none; }</style>
            <p>Visible text stays.</p>
        </body></html>"#;
        let result = SoupStrategy.extract(html.as_bytes(), "https://example.com/").unwrap();
        assert!(result.text.contains("Visible text stays."));
        assert!(!result.text.contains("should not appear"));
        assert!(!result.text.contains("display: none"));
    }

    #[test]
    fn confidence_capped_low() {
        let body: String = std::iter::repeat("word ").take(5000).collect();
        let html = format!("<html><body><p>{body}</p></body></html>");
        let result = SoupStrategy.extract(html.as_bytes(), "https://example.com/").unwrap();
        assert!(result.confidence <= 0.6);
    }
}
