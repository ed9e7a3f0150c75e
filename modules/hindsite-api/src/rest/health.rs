//! Health and metrics endpoints for the archive-source plane and the sync
//! pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Json},
};

use hindsite_common::ArchiveSource;
use hindsite_sources::{overall_status, source_health, SourceHealth};

use crate::state::AppState;

/// Liveness plus sync posture: degraded when the dead-letter queue is deep.
pub async fn health(State(state): State<Arc<AppState>>) -> axum::response::Response {
    let sync = state.synchronizer.status().await;
    let consistency = state
        .validator
        .last_report()
        .await
        .map(|r| r.consistency_score);
    Json(serde_json::json!({
        "status": if sync.degraded { "degraded" } else { "ok" },
        "sync": sync,
        "consistency_score": consistency,
    }))
    .into_response()
}

fn collect_source_health(state: &AppState) -> HashMap<ArchiveSource, SourceHealth> {
    let counters = state.router.metrics().snapshot();
    state
        .router
        .strategies()
        .iter()
        .map(|strategy| {
            let source = strategy.source();
            (
                source,
                source_health(counters.get(&source), &strategy.list_cb().status()),
            )
        })
        .collect()
}

pub async fn archive_sources_health(
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    let health = collect_source_health(&state);
    let views: Vec<&SourceHealth> = health.values().collect();
    let status = overall_status(&views);

    let sources: serde_json::Map<String, serde_json::Value> = health
        .iter()
        .map(|(source, h)| {
            (
                source.as_str().to_string(),
                serde_json::to_value(h).unwrap_or_default(),
            )
        })
        .collect();

    Json(serde_json::json!({
        "status": status,
        "sources": sources,
    }))
    .into_response()
}

pub async fn archive_sources_metrics(
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    let counters = state.router.metrics().snapshot();

    let mut sources = serde_json::Map::new();
    let mut breakers = serde_json::Map::new();
    for strategy in state.router.strategies() {
        let source = strategy.source();
        if let Some(c) = counters.get(&source) {
            sources.insert(
                source.as_str().to_string(),
                serde_json::to_value(c).unwrap_or_default(),
            );
        }
        let list = strategy.list_cb().status();
        let fetch = strategy.fetch_cb().status();
        breakers.insert(
            source.as_str().to_string(),
            serde_json::json!({
                "list": {
                    "state": list.state,
                    "failure_count": list.failure_count,
                    "success_count": list.success_count,
                    "next_attempt_time": list.next_probe_at,
                },
                "fetch": {
                    "state": fetch.state,
                    "failure_count": fetch.failure_count,
                    "success_count": fetch.success_count,
                    "next_attempt_time": fetch.next_probe_at,
                },
                "config": strategy.config(),
            }),
        );
    }

    Json(serde_json::json!({
        "sources": sources,
        "circuit_breakers": breakers,
    }))
    .into_response()
}

/// Clears counters; breaker state is deliberately untouched.
pub async fn reset_archive_sources_metrics(
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    state.router.metrics().reset();
    Json(serde_json::json!({ "status": "reset" })).into_response()
}
