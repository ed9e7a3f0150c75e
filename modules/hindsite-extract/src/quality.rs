//! Page quality scoring: a 0–100 blend of readability, completeness,
//! metadata richness, uniqueness, and structure. Deterministic for identical
//! inputs.

use std::collections::VecDeque;

use crate::strategy::ExtractionResult;

/// Component weights. They sum to 1.0.
const W_READABILITY: f32 = 0.25;
const W_COMPLETENESS: f32 = 0.30;
const W_METADATA: f32 = 0.20;
const W_UNIQUENESS: f32 = 0.15;
const W_STRUCTURE: f32 = 0.10;

/// Score a result given a uniqueness component in [0, 1].
pub fn quality_score(result: &ExtractionResult, uniqueness: f32) -> u8 {
    let score = W_READABILITY * readability_component(&result.text)
        + W_COMPLETENESS * completeness_component(result)
        + W_METADATA * metadata_component(result)
        + W_UNIQUENESS * uniqueness.clamp(0.0, 1.0)
        + W_STRUCTURE * structure_component(result);
    (score * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Alphabetic density plus sentence lengths in a readable band.
fn readability_component(text: &str) -> f32 {
    if text.is_empty() {
        return 0.0;
    }
    let total = text.chars().count() as f32;
    let alpha = text.chars().filter(|c| c.is_alphabetic() || c.is_whitespace()).count() as f32;
    let alpha_density = alpha / total;

    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .collect();
    let sentence_score = if sentences.is_empty() {
        0.3
    } else {
        let avg_words = text.split_whitespace().count() as f32 / sentences.len() as f32;
        // 8–30 words per sentence reads well; taper outside the band.
        if (8.0..=30.0).contains(&avg_words) {
            1.0
        } else if avg_words < 8.0 {
            (avg_words / 8.0).max(0.2)
        } else {
            (30.0 / avg_words).max(0.2)
        }
    };

    (alpha_density * 0.5 + sentence_score * 0.5).clamp(0.0, 1.0)
}

/// Enough words to be an article, and a title to stand under.
fn completeness_component(result: &ExtractionResult) -> f32 {
    let words = (result.word_count as f32 / 400.0).min(1.0);
    let title = if result.title.trim().is_empty() { 0.0 } else { 1.0 };
    words * 0.7 + title * 0.3
}

fn metadata_component(result: &ExtractionResult) -> f32 {
    let count = result.metadata.as_object().map(|m| m.len()).unwrap_or(0);
    (count as f32 / 5.0).min(1.0)
}

/// Headings and paragraph breaks signal preserved document structure.
fn structure_component(result: &ExtractionResult) -> f32 {
    match &result.markdown {
        Some(md) => {
            let headings = md.lines().filter(|l| l.trim_start().starts_with('#')).count();
            let paragraphs = md.split("\n\n").filter(|p| !p.trim().is_empty()).count();
            let heading_score = (headings as f32 / 3.0).min(1.0);
            let paragraph_score = (paragraphs as f32 / 5.0).min(1.0);
            heading_score * 0.4 + paragraph_score * 0.6
        }
        None => {
            let paragraphs = result.text.split('\n').filter(|p| !p.trim().is_empty()).count();
            ((paragraphs as f32 / 5.0).min(1.0)) * 0.5
        }
    }
}

// ---------------------------------------------------------------------------
// Uniqueness: simhash over word shingles, compared against recent pages
// ---------------------------------------------------------------------------

/// 64-bit simhash over 4-word shingles. Near-duplicate texts land within a
/// few bits of each other.
pub fn simhash(text: &str) -> u64 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0;
    }
    let mut weights = [0i32; 64];
    let shingle_count = words.len().saturating_sub(3).max(1);
    for i in 0..shingle_count {
        let end = (i + 4).min(words.len());
        let shingle = words[i..end].join(" ").to_lowercase();
        let h = fnv1a(shingle.as_bytes());
        for (bit, weight) in weights.iter_mut().enumerate() {
            if h >> bit & 1 == 1 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }
    let mut hash = 0u64;
    for (bit, weight) in weights.iter().enumerate() {
        if *weight > 0 {
            hash |= 1 << bit;
        }
    }
    hash
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub fn hamming_similarity(a: u64, b: u64) -> f32 {
    1.0 - (a ^ b).count_ones() as f32 / 64.0
}

/// Ring of recent page simhashes for the uniqueness component. Duplicated
/// content scores near zero; novel content near one.
pub struct RecentHashes {
    ring: VecDeque<u64>,
    capacity: usize,
}

impl RecentHashes {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Uniqueness of `hash` against the ring, in [0, 1].
    pub fn uniqueness(&self, hash: u64) -> f32 {
        let best = self
            .ring
            .iter()
            .map(|h| hamming_similarity(*h, hash))
            .fold(0.0f32, f32::max);
        // Similarity below 0.7 is unrelated content; scale the rest.
        if best <= 0.7 {
            1.0
        } else {
            ((1.0 - best) / 0.3).clamp(0.0, 1.0)
        }
    }

    pub fn push(&mut self, hash: u64) {
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str, title: &str, markdown: Option<&str>) -> ExtractionResult {
        ExtractionResult {
            method: "trafilatura".into(),
            title: title.into(),
            text: text.into(),
            markdown: markdown.map(String::from),
            language: "en".into(),
            word_count: text.split_whitespace().count() as u32,
            char_count: text.chars().count() as u32,
            metadata: serde_json::json!({"description": "x", "author": "y"}),
            confidence: 0.8,
        }
    }

    fn article_text() -> String {
        std::iter::repeat(
            "The committee met on Tuesday to discuss the harbor expansion. \
             Residents raised concerns about traffic and noise during construction. ",
        )
        .take(30)
        .collect()
    }

    #[test]
    fn rich_article_scores_high() {
        let text = article_text();
        let md = format!("# Harbor Expansion\n\n{}\n\n## Next Steps\n\nMore meetings.", text);
        let r = result(&text, "Harbor Expansion", Some(&md));
        let score = quality_score(&r, 1.0);
        assert!(score >= 70, "expected a high score, got {score}");
    }

    #[test]
    fn empty_text_scores_low() {
        let r = result("", "", None);
        let score = quality_score(&r, 1.0);
        assert!(score <= 30, "expected a low score, got {score}");
    }

    #[test]
    fn duplicate_scores_below_unique() {
        let text = article_text();
        let r = result(&text, "Harbor Expansion", None);
        let unique = quality_score(&r, 1.0);
        let duplicate = quality_score(&r, 0.0);
        assert!(duplicate < unique);
    }

    #[test]
    fn simhash_is_stable_and_discriminating() {
        let a = article_text();
        let b = "Completely different subject matter about gardening tips and soil quality in raised beds through the seasons.";
        assert_eq!(simhash(&a), simhash(&a));
        let sim_same = hamming_similarity(simhash(&a), simhash(&a));
        let sim_diff = hamming_similarity(simhash(&a), simhash(b));
        assert_eq!(sim_same, 1.0);
        assert!(sim_diff < 0.9);
    }

    #[test]
    fn recent_hashes_flag_duplicates() {
        let mut ring = RecentHashes::new(10);
        let text = article_text();
        let h = simhash(&text);
        assert_eq!(ring.uniqueness(h), 1.0);
        ring.push(h);
        assert_eq!(ring.uniqueness(h), 0.0);
    }
}
