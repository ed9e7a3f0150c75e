//! Per-source counters and health rollup for the archive-sources metrics and
//! health endpoints.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use hindsite_common::{ArchiveSource, CircuitState, CircuitStatus};

use crate::error::SourceErrorKind;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceCounters {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_records: u64,
    pub avg_response_seconds: f64,
    pub error_counts: HashMap<String, u64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(skip)]
    total_duration_ms: u64,
}

impl SourceCounters {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.successful as f64 / self.total as f64
    }
}

/// Shared registry of per-source call outcomes. Counters only; breaker state
/// lives on the strategies and is merged in at read time.
#[derive(Default)]
pub struct SourceMetrics {
    inner: Mutex<HashMap<ArchiveSource, SourceCounters>>,
}

impl SourceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, source: ArchiveSource, duration_ms: u64, records: u64) {
        let mut inner = self.inner.lock().unwrap();
        let counters = inner.entry(source).or_default();
        counters.total += 1;
        counters.successful += 1;
        counters.total_records += records;
        counters.total_duration_ms += duration_ms;
        counters.avg_response_seconds =
            counters.total_duration_ms as f64 / 1000.0 / counters.total as f64;
        counters.last_success = Some(Utc::now());
    }

    pub fn record_failure(&self, source: ArchiveSource, duration_ms: u64, kind: SourceErrorKind) {
        let mut inner = self.inner.lock().unwrap();
        let counters = inner.entry(source).or_default();
        counters.total += 1;
        counters.failed += 1;
        counters.total_duration_ms += duration_ms;
        counters.avg_response_seconds =
            counters.total_duration_ms as f64 / 1000.0 / counters.total as f64;
        counters.last_failure = Some(Utc::now());
        *counters.error_counts.entry(kind.as_str().to_string()).or_default() += 1;
    }

    pub fn snapshot(&self) -> HashMap<ArchiveSource, SourceCounters> {
        self.inner.lock().unwrap().clone()
    }

    /// Clear counters. Breaker state is untouched; the reset endpoint is for
    /// counters only.
    pub fn reset(&self) {
        self.inner.lock().unwrap().clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub healthy: bool,
    pub circuit_breaker_state: CircuitState,
    pub success_rate: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Roll one source's counters and breaker status into a health view.
pub fn source_health(counters: Option<&SourceCounters>, cb: &CircuitStatus) -> SourceHealth {
    let success_rate = counters.map(SourceCounters::success_rate).unwrap_or(1.0);
    SourceHealth {
        healthy: cb.state == CircuitState::Closed && success_rate >= 0.5,
        circuit_breaker_state: cb.state,
        success_rate,
        last_success: counters.and_then(|c| c.last_success),
        last_failure: counters.and_then(|c| c.last_failure),
    }
}

/// Overall status: all healthy → healthy, some → degraded, none → unhealthy.
pub fn overall_status(sources: &[&SourceHealth]) -> HealthStatus {
    let healthy = sources.iter().filter(|s| s.healthy).count();
    if healthy == sources.len() && !sources.is_empty() {
        HealthStatus::Healthy
    } else if healthy > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = SourceMetrics::new();
        metrics.record_success(ArchiveSource::WaybackMachine, 200, 50);
        metrics.record_failure(
            ArchiveSource::WaybackMachine,
            400,
            SourceErrorKind::Retriable,
        );
        let snap = metrics.snapshot();
        let wb = &snap[&ArchiveSource::WaybackMachine];
        assert_eq!(wb.total, 2);
        assert_eq!(wb.successful, 1);
        assert_eq!(wb.failed, 1);
        assert_eq!(wb.total_records, 50);
        assert_eq!(wb.error_counts["retriable"], 1);
        assert!((wb.avg_response_seconds - 0.3).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_counters() {
        let metrics = SourceMetrics::new();
        metrics.record_success(ArchiveSource::CommonCrawl, 100, 10);
        metrics.reset();
        assert!(metrics.snapshot().is_empty());
    }

    #[test]
    fn overall_rollup() {
        let healthy = SourceHealth {
            healthy: true,
            circuit_breaker_state: CircuitState::Closed,
            success_rate: 1.0,
            last_success: None,
            last_failure: None,
        };
        let sick = SourceHealth {
            healthy: false,
            ..healthy.clone()
        };
        assert_eq!(overall_status(&[&healthy, &healthy]), HealthStatus::Healthy);
        assert_eq!(overall_status(&[&healthy, &sick]), HealthStatus::Degraded);
        assert_eq!(overall_status(&[&sick]), HealthStatus::Unhealthy);
    }
}
