//! Extraction strategy contract and shared text helpers.

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// What one strategy produced for one capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Stable method label persisted on the page ("trafilatura",
    /// "newspaper", "beautifulsoup").
    pub method: String,
    pub title: String,
    pub text: String,
    pub markdown: Option<String>,
    pub language: String,
    pub word_count: u32,
    pub char_count: u32,
    pub metadata: serde_json::Value,
    pub confidence: f32,
}

/// One extraction tier. Implementations are pure: identical bytes and URL
/// always produce an identical result.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Declared F1 hint, tie-break metadata only.
    fn f1_hint(&self) -> f32;

    fn extract(&self, html: &[u8], url: &str) -> Result<ExtractionResult, ExtractError>;
}

pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Collapse runs of whitespace and blank lines into readable plain text.
pub fn tidy_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0u32;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
            continue;
        }
        blank_run = 0;
        let mut first = true;
        for word in line.split_whitespace() {
            if !first {
                out.push(' ');
            }
            out.push_str(word);
            first = false;
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Strip markdown syntax down to plain text for word counting and digesting.
pub fn markdown_to_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    for line in markdown.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("```") {
            out.push('\n');
            continue;
        }
        let line = line.trim_start_matches(['#', '>', '*', '-']).trim_start();
        let mut cleaned = String::with_capacity(line.len());
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' | '_' | '`' => {}
                '[' => {
                    // [label](url) → label
                    let mut label = String::new();
                    for inner in chars.by_ref() {
                        if inner == ']' {
                            break;
                        }
                        label.push(inner);
                    }
                    if chars.peek() == Some(&'(') {
                        chars.next();
                        for inner in chars.by_ref() {
                            if inner == ')' {
                                break;
                            }
                        }
                    }
                    cleaned.push_str(&label);
                }
                _ => cleaned.push(c),
            }
        }
        out.push_str(cleaned.trim());
        out.push('\n');
    }
    tidy_text(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tidy_collapses_whitespace() {
        let raw = "  Hello   world  \n\n\n\nSecond   line\t here ";
        assert_eq!(tidy_text(raw), "Hello world\n\nSecond line here");
    }

    #[test]
    fn markdown_stripping() {
        let md = "# Title\n\nSome **bold** and a [link](https://example.com) here.\n\n- item one";
        let text = markdown_to_text(md);
        assert!(text.contains("Title"));
        assert!(text.contains("Some bold and a link here."));
        assert!(!text.contains("https://example.com"));
        assert!(!text.contains("**"));
    }

    #[test]
    fn word_counting() {
        assert_eq!(word_count("one two  three\nfour"), 4);
        assert_eq!(word_count(""), 0);
    }
}
