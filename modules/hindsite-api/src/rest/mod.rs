use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::state::AppState;

pub mod health;
pub mod projects;
pub mod scrape_pages;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/projects", post(projects::create_project))
        .route("/projects/{id}", patch(projects::patch_project))
        .route("/projects/{id}/scrape", post(projects::start_scrape))
        .route("/projects/{id}/sessions", get(projects::list_sessions))
        .route(
            "/projects/{id}/scrape-pages",
            get(scrape_pages::list_scrape_pages),
        )
        .route(
            "/projects/{id}/scrape-pages/manual-processing/bulk/preview",
            post(scrape_pages::bulk_preview),
        )
        .route(
            "/projects/{id}/scrape-pages/manual-processing/bulk",
            post(scrape_pages::bulk_apply),
        )
        .route("/jobs/{id}", get(projects::get_job))
        .route("/jobs/{id}/cancel", post(projects::cancel_job))
        .route("/health", get(health::health))
        .route("/health/archive-sources", get(health::archive_sources_health))
        .route(
            "/metrics/archive-sources",
            get(health::archive_sources_metrics),
        )
        .route(
            "/metrics/archive-sources/reset",
            post(health::reset_archive_sources_metrics),
        )
        .with_state(state)
}
