//! Tiered extraction: strategies in declared quality order, each behind its
//! own circuit breaker and timeout, with automatic degradation when no tier
//! clears the acceptance bar.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use hindsite_common::{
    content_digest, CircuitBreaker, CircuitBreakerConfig, CircuitStatus, ExtractedContent,
};

use crate::article::ArticleStrategy;
use crate::error::ExtractError;
use crate::quality::{quality_score, simhash, RecentHashes};
use crate::readability::ReadabilityStrategy;
use crate::soup::SoupStrategy;
use crate::strategy::{ExtractionResult, ExtractionStrategy};

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Results at or above this confidence are accepted outright.
    pub accept_threshold: f32,
    /// Minimum words for outright acceptance.
    pub min_words: u32,
    /// Per-strategy wall-clock budget.
    pub strategy_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.6,
            min_words: 20,
            strategy_timeout: Duration::from_secs(30),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

struct Tier {
    strategy: Arc<dyn ExtractionStrategy>,
    breaker: CircuitBreaker,
}

/// Extraction outcome: the chosen result, flagged when it only survived
/// through degradation.
#[derive(Debug, Clone)]
pub struct TieredOutcome {
    pub result: ExtractionResult,
    pub degraded: bool,
}

pub struct TieredExtractor {
    tiers: Vec<Tier>,
    config: ExtractorConfig,
}

impl TieredExtractor {
    /// The declared tier order: readability, article heuristics, whole-DOM.
    pub fn new(config: ExtractorConfig) -> Self {
        let strategies: Vec<Arc<dyn ExtractionStrategy>> = vec![
            Arc::new(ReadabilityStrategy),
            Arc::new(ArticleStrategy),
            Arc::new(SoupStrategy),
        ];
        let tiers = strategies
            .into_iter()
            .map(|strategy| Tier {
                breaker: CircuitBreaker::new(
                    format!("extract.{}", strategy.name()),
                    config.breaker.clone(),
                ),
                strategy,
            })
            .collect();
        Self { tiers, config }
    }

    /// Breaker snapshots for health reporting, keyed by method label.
    pub fn breaker_status(&self) -> Vec<(String, CircuitStatus)> {
        self.tiers
            .iter()
            .map(|t| (t.strategy.name().to_string(), t.breaker.status()))
            .collect()
    }

    /// Run the tier chain over one capture's bytes.
    pub async fn extract(&self, html: &[u8], url: &str) -> Result<TieredOutcome, ExtractError> {
        let html: Arc<Vec<u8>> = Arc::new(html.to_vec());
        let mut best: Option<ExtractionResult> = None;

        for tier in &self.tiers {
            let permit = match tier.breaker.acquire() {
                Ok(p) => p,
                Err(()) => {
                    debug!(strategy = tier.strategy.name(), "Tier skipped, breaker open");
                    continue;
                }
            };

            let strategy = Arc::clone(&tier.strategy);
            let bytes = Arc::clone(&html);
            let url_owned = url.to_string();
            let ran = tokio::time::timeout(
                self.config.strategy_timeout,
                tokio::task::spawn_blocking(move || strategy.extract(&bytes, &url_owned)),
            )
            .await;

            let outcome = match ran {
                Err(_) => Err(ExtractError::Timeout(self.config.strategy_timeout)),
                Ok(Err(join_err)) => Err(ExtractError::StrategyFailed(join_err.to_string())),
                Ok(Ok(result)) => result,
            };

            match outcome {
                Ok(result) => {
                    permit.record(true);
                    let accepted = result.confidence >= self.config.accept_threshold
                        && result.word_count >= self.config.min_words;
                    if accepted {
                        info!(
                            url,
                            method = result.method.as_str(),
                            words = result.word_count,
                            confidence = result.confidence,
                            "Extraction accepted"
                        );
                        return Ok(TieredOutcome {
                            result,
                            degraded: false,
                        });
                    }
                    debug!(
                        url,
                        method = result.method.as_str(),
                        words = result.word_count,
                        confidence = result.confidence,
                        "Tier below threshold, trying next"
                    );
                    let better = best
                        .as_ref()
                        .is_none_or(|b| result.confidence > b.confidence);
                    if better {
                        best = Some(result);
                    }
                }
                Err(ExtractError::SoftFail(reason)) => {
                    // The strategy ran fine, the page just had nothing for it.
                    permit.record(true);
                    debug!(url, strategy = tier.strategy.name(), reason, "Tier soft failure");
                }
                Err(e) => {
                    permit.record(false);
                    warn!(url, strategy = tier.strategy.name(), error = %e, "Tier failed");
                }
            }
        }

        // Degradation: the best sub-threshold result survives if it has at
        // least half the word floor.
        match best {
            Some(result) if result.word_count >= self.config.min_words.div_ceil(2) => {
                info!(
                    url,
                    method = result.method.as_str(),
                    words = result.word_count,
                    "Extraction degraded"
                );
                Ok(TieredOutcome {
                    result,
                    degraded: true,
                })
            }
            _ => Err(ExtractError::ExtractionFailed),
        }
    }
}

/// Assemble the persistable content record: canonical digest, quality score
/// against the recent-page ring, and the degraded flag folded into metadata.
pub fn finalize(
    original_url: &str,
    capture_timestamp: &str,
    outcome: TieredOutcome,
    recent: &mut RecentHashes,
) -> ExtractedContent {
    let TieredOutcome { result, degraded } = outcome;
    let hash = simhash(&result.text);
    let uniqueness = recent.uniqueness(hash);
    let score = quality_score(&result, uniqueness);
    recent.push(hash);

    let mut metadata = result.metadata;
    if degraded {
        if let Some(map) = metadata.as_object_mut() {
            map.insert("degraded".into(), serde_json::Value::Bool(true));
        }
    }

    ExtractedContent {
        original_url: original_url.to_string(),
        capture_timestamp: capture_timestamp.to_string(),
        content_digest: content_digest(&result.text),
        title: result.title,
        text: result.text,
        markdown: result.markdown,
        language: result.language,
        word_count: result.word_count,
        char_count: result.char_count,
        extraction_method: result.method,
        extraction_confidence: result.confidence,
        quality_score: score,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_html() -> String {
        let body: String = std::iter::repeat(
            "The council approved the new library budget after a long debate. \
             Supporters argued the branch serves three neighborhoods. ",
        )
        .take(20)
        .collect();
        format!(
            r#"<html><head><title>Library Budget Approved</title>
            <meta property="og:title" content="Library Budget Approved" />
            <meta name="description" content="Council vote recap" />
            </head><body><article><h1>Library Budget Approved</h1><p>{body}</p></article></body></html>"#
        )
    }

    #[tokio::test]
    async fn accepts_first_tier_for_real_articles() {
        let extractor = TieredExtractor::new(ExtractorConfig::default());
        let outcome = extractor
            .extract(article_html().as_bytes(), "https://example.com/news/library")
            .await
            .expect("article extracts");
        assert!(!outcome.degraded);
        assert_eq!(outcome.result.method, "trafilatura");
        assert!(outcome.result.word_count >= 20);
        assert!(outcome.result.confidence >= 0.6);
    }

    #[tokio::test]
    async fn fails_on_empty_document() {
        let extractor = TieredExtractor::new(ExtractorConfig::default());
        let err = extractor
            .extract(b"<html><body></body></html>", "https://example.com/empty")
            .await
            .expect_err("nothing to extract");
        assert!(matches!(err, ExtractError::ExtractionFailed));
    }

    #[tokio::test]
    async fn degrades_for_thin_content() {
        let extractor = TieredExtractor::new(ExtractorConfig {
            // Force the accept bar out of reach so degradation kicks in.
            accept_threshold: 0.99,
            ..ExtractorConfig::default()
        });
        let outcome = extractor
            .extract(article_html().as_bytes(), "https://example.com/news/library")
            .await
            .expect("degraded result survives");
        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn determinism_across_runs() {
        let extractor = TieredExtractor::new(ExtractorConfig::default());
        let html = article_html();
        let a = extractor
            .extract(html.as_bytes(), "https://example.com/news/library")
            .await
            .unwrap();
        let b = extractor
            .extract(html.as_bytes(), "https://example.com/news/library")
            .await
            .unwrap();
        assert_eq!(a.result.method, b.result.method);
        assert_eq!(a.result.text, b.result.text);
        assert_eq!(a.result.title, b.result.title);
        assert_eq!(a.result.word_count, b.result.word_count);
        assert_eq!(a.result.confidence, b.result.confidence);

        let mut recent_a = RecentHashes::new(16);
        let mut recent_b = RecentHashes::new(16);
        let fa = finalize("https://example.com/news/library", "20240315120000", a, &mut recent_a);
        let fb = finalize("https://example.com/news/library", "20240315120000", b, &mut recent_b);
        assert_eq!(fa.content_digest, fb.content_digest);
        assert_eq!(fa.quality_score, fb.quality_score);
        assert_eq!(fa.extraction_method, fb.extraction_method);
    }
}
