//! Archive policy: how a project chooses between archive sources and what it
//! does when one fails. Resolved from API input with defaults, stored on the
//! project as JSONB, consumed by the source router.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ArchiveSelection, ArchiveSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Fall back on any error from the current source.
    Immediate,
    /// Retry retriable errors up to max_retries, then fall back.
    RetryThenFallback,
    /// Fall back only when the source's circuit breaker is open.
    CircuitBreaker,
}

impl Default for FallbackStrategy {
    fn default() -> Self {
        FallbackStrategy::CircuitBreaker
    }
}

impl std::fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackStrategy::Immediate => write!(f, "immediate"),
            FallbackStrategy::RetryThenFallback => write!(f, "retry_then_fallback"),
            FallbackStrategy::CircuitBreaker => write!(f, "circuit_breaker"),
        }
    }
}

impl std::str::FromStr for FallbackStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "retry_then_fallback" => Ok(Self::RetryThenFallback),
            "circuit_breaker" => Ok(Self::CircuitBreaker),
            other => Err(format!("unknown FallbackStrategy: {other}")),
        }
    }
}

/// Per-source tuning. Bounds are enforced at the API boundary; the defaults
/// here are what a project gets when it sends nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub enabled: bool,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub page_size: u32,
    /// 0 = unbounded.
    pub max_pages: u32,
    pub include_attachments: bool,
    /// Lower sorts first when resolving hybrid order.
    pub priority: u32,
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: 60,
            max_retries: 3,
            page_size: 5000,
            max_pages: 10,
            include_attachments: false,
            priority: 50,
        }
    }
}

/// The resolved archive policy persisted on a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivePolicy {
    pub archive_source: ArchiveSelection,
    pub fallback_enabled: bool,
    #[serde(default)]
    pub fallback_strategy: FallbackStrategy,
    pub fallback_delay_seconds: f64,
    pub exponential_backoff: bool,
    pub max_fallback_delay: f64,
    pub wayback_machine: SourceConfig,
    pub common_crawl: SourceConfig,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            archive_source: ArchiveSelection::WaybackMachine,
            fallback_enabled: true,
            fallback_strategy: FallbackStrategy::default(),
            fallback_delay_seconds: 1.0,
            exponential_backoff: true,
            max_fallback_delay: 30.0,
            wayback_machine: SourceConfig::default(),
            common_crawl: SourceConfig {
                priority: 60,
                ..SourceConfig::default()
            },
        }
    }
}

impl ArchivePolicy {
    pub fn source_config(&self, source: ArchiveSource) -> &SourceConfig {
        match source {
            ArchiveSource::WaybackMachine => &self.wayback_machine,
            ArchiveSource::CommonCrawl => &self.common_crawl,
        }
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_secs_f64(self.fallback_delay_seconds)
    }

    pub fn max_fallback_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_fallback_delay)
    }

    /// Retry delay for attempt n (0-based) under this policy, capped at
    /// max_fallback_delay.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.fallback_delay_seconds.max(0.0);
        let secs = if self.exponential_backoff {
            base * 2f64.powi(attempt as i32)
        } else {
            base
        };
        Duration::from_secs_f64(secs.min(self.max_fallback_delay))
    }

    /// Hybrid requires fallback; single-source selections ignore it.
    pub fn validate(&self) -> Result<(), String> {
        if self.archive_source == ArchiveSelection::Hybrid && !self.fallback_enabled {
            return Err("hybrid archive_source requires fallback_enabled=true".into());
        }
        if !(0.0..=300.0).contains(&self.fallback_delay_seconds) {
            return Err("fallback_delay_seconds must be within [0, 300]".into());
        }
        if !(1.0..=3600.0).contains(&self.max_fallback_delay) {
            return Err("max_fallback_delay must be within [1, 3600]".into());
        }
        for (name, cfg) in [
            ("wayback_machine", &self.wayback_machine),
            ("common_crawl", &self.common_crawl),
        ] {
            if !(10..=600).contains(&cfg.timeout_seconds) {
                return Err(format!("{name}.timeout_seconds must be within [10, 600]"));
            }
            if cfg.max_retries > 10 {
                return Err(format!("{name}.max_retries must be within [0, 10]"));
            }
            if !(100..=50_000).contains(&cfg.page_size) {
                return Err(format!("{name}.page_size must be within [100, 50000]"));
            }
            if !(1..=100).contains(&cfg.priority) {
                return Err(format!("{name}.priority must be within [1, 100]"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ArchivePolicy::default().validate().is_ok());
    }

    #[test]
    fn hybrid_requires_fallback() {
        let policy = ArchivePolicy {
            archive_source: ArchiveSelection::Hybrid,
            fallback_enabled: false,
            ..ArchivePolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn retry_delay_caps_at_max() {
        let policy = ArchivePolicy {
            fallback_delay_seconds: 2.0,
            exponential_backoff: true,
            max_fallback_delay: 10.0,
            ..ArchivePolicy::default()
        };
        assert_eq!(policy.retry_delay(0), Duration::from_secs_f64(2.0));
        assert_eq!(policy.retry_delay(1), Duration::from_secs_f64(4.0));
        assert_eq!(policy.retry_delay(2), Duration::from_secs_f64(8.0));
        assert_eq!(policy.retry_delay(3), Duration::from_secs_f64(10.0));
        assert_eq!(policy.retry_delay(8), Duration::from_secs_f64(10.0));
    }

    #[test]
    fn retry_delay_linear_without_backoff() {
        let policy = ArchivePolicy {
            fallback_delay_seconds: 3.0,
            exponential_backoff: false,
            ..ArchivePolicy::default()
        };
        assert_eq!(policy.retry_delay(5), Duration::from_secs_f64(3.0));
    }

    #[test]
    fn bounds_rejected() {
        let mut policy = ArchivePolicy::default();
        policy.wayback_machine.page_size = 50;
        assert!(policy.validate().is_err());
    }
}
