//! Highest-quality tier: Readability main-content extraction to markdown via
//! spider_transformations. Persisted method label: "trafilatura".

use scraper::Html;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};

use crate::dom::{extract_metadata, extract_title};
use crate::error::ExtractError;
use crate::language::detect_language;
use crate::strategy::{markdown_to_text, word_count, ExtractionResult, ExtractionStrategy};

/// Convert raw HTML bytes into clean markdown using Readability extraction.
fn html_to_markdown(html: &[u8], url: Option<&str>) -> String {
    let parsed_url = url.and_then(|u| url::Url::parse(u).ok());
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html,
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    transform_content_input(input, &config)
}

pub struct ReadabilityStrategy;

impl ExtractionStrategy for ReadabilityStrategy {
    fn name(&self) -> &'static str {
        "trafilatura"
    }

    fn f1_hint(&self) -> f32 {
        0.945
    }

    fn extract(&self, html: &[u8], url: &str) -> Result<ExtractionResult, ExtractError> {
        let markdown = html_to_markdown(html, Some(url));
        if markdown.trim().is_empty() {
            return Err(ExtractError::SoftFail("readability produced no content".into()));
        }

        let text = markdown_to_text(&markdown);
        let words = word_count(&text);
        if words == 0 {
            return Err(ExtractError::SoftFail("readability produced no words".into()));
        }

        let html_str = String::from_utf8_lossy(html);
        let doc = Html::parse_document(&html_str);
        let title = extract_title(&doc);
        let metadata = extract_metadata(&doc);

        let confidence = (0.55
            + (words as f32 / 600.0).min(0.35)
            + if title.is_empty() { 0.0 } else { 0.05 })
        .min(0.95);

        Ok(ExtractionResult {
            method: self.name().to_string(),
            title,
            language: detect_language(&text),
            word_count: words,
            char_count: text.chars().count() as u32,
            text,
            markdown: Some(markdown),
            metadata,
            confidence,
        })
    }
}
