//! The hindsite API binary: wires the source router, job engine, dual-write
//! synchronizer, CDC bridge, and consistency validator, then serves HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use hindsite_common::{telemetry, CircuitBreakerConfig, Config, ConsistencyLevel};
use hindsite_extract::{ExtractorConfig, TieredExtractor};
use hindsite_jobs::{EngineConfig, JobEngine, JobStore};
use hindsite_pipeline::PipelineDeps;
use hindsite_sources::{
    ArchiveStrategy, CommonCrawlStrategy, RouterConfig, SourceMetrics, SourceRouter,
    WaybackStrategy,
};
use hindsite_store::{OutboxStore, PersistenceFacade, Store, SyncPolicy};
use hindsite_sync::{
    AnalyticalStore, CdcBridge, CdcConfig, ConsistencyValidator, DualWriteSynchronizer, DwsConfig,
    LogSink, SearchIndexPump, SearchPumpConfig, ValidatorConfig,
};

mod rest;
mod state;
mod validation;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("hindsite=info,tower_http=info,warn");
    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await?;

    let store = Store::new(pool.clone());
    store.migrate().await?;
    info!("Migrations applied");

    // Archive source plane. Per-project tuning overrides these defaults at
    // request time; the breakers and metrics are shared process-wide.
    let cb_config = CircuitBreakerConfig::default();
    let strategies: Vec<Arc<dyn ArchiveStrategy>> = vec![
        Arc::new(WaybackStrategy::new(Default::default(), cb_config.clone())),
        Arc::new(CommonCrawlStrategy::new(Default::default(), cb_config)),
    ];
    let metrics = Arc::new(SourceMetrics::new());
    let router = Arc::new(SourceRouter::new(
        strategies,
        Arc::clone(&metrics),
        RouterConfig::default(),
    ));

    // Storage plane.
    let analytical = AnalyticalStore::new(pool.clone());
    let consistency: ConsistencyLevel = config
        .consistency_level
        .parse()
        .unwrap_or(ConsistencyLevel::Eventual);
    let facade = PersistenceFacade::with_sync(
        pool.clone(),
        SyncPolicy {
            level: consistency,
            handoff: Some(Arc::new(analytical.clone())),
            strong_wait: Duration::from_millis(config.strong_sync_wait_ms),
        },
    );
    let outbox = OutboxStore::new(pool.clone());
    let jobs = JobStore::new(pool.clone(), config.queue_capacity);

    // Extraction plane.
    let extractor = Arc::new(TieredExtractor::new(ExtractorConfig::default()));

    // Pipeline wiring and the job engine.
    let deps = PipelineDeps::new(
        store.clone(),
        facade.clone(),
        Arc::clone(&router),
        Arc::clone(&extractor),
        config.extract_concurrency,
    );
    let mut engine = JobEngine::new(
        jobs.clone(),
        EngineConfig {
            worker_count: config.worker_count,
            max_tasks_per_worker: config.max_tasks_per_worker,
            ..EngineConfig::default()
        },
    );
    hindsite_pipeline::register_handlers(&mut engine, Arc::clone(&deps));
    let engine = Arc::new(engine);

    // Background services.
    let shutdown = CancellationToken::new();
    let mut service_handles = engine.clone().start(shutdown.clone());

    let synchronizer = Arc::new(DualWriteSynchronizer::new(
        outbox.clone(),
        analytical.clone(),
        DwsConfig {
            batch_size: config.sync_batch_size,
            max_attempts: config.sync_max_attempts,
            ..DwsConfig::default()
        },
    ));
    service_handles.push(tokio::spawn(
        Arc::clone(&synchronizer).run(shutdown.clone()),
    ));

    let cdc = Arc::new(CdcBridge::new(
        outbox.clone(),
        CdcConfig {
            grace: Duration::from_secs((config.cdc_grace_minutes * 60).max(0) as u64),
            ..CdcConfig::default()
        },
    ));
    service_handles.push(tokio::spawn(cdc.run(shutdown.clone())));

    // Search events go to the log until a real sink is configured.
    let search_pump = Arc::new(SearchIndexPump::new(
        pool.clone(),
        Arc::new(LogSink),
        SearchPumpConfig::default(),
    ));
    service_handles.push(tokio::spawn(search_pump.run(shutdown.clone())));

    let validator = Arc::new(ConsistencyValidator::new(
        pool.clone(),
        outbox.clone(),
        jobs.clone(),
        ValidatorConfig {
            interval: Duration::from_secs(config.validator_interval_seconds),
            sample_size: config.validator_sample_size,
            ..ValidatorConfig::default()
        },
    ));
    service_handles.push(tokio::spawn(Arc::clone(&validator).run(shutdown.clone())));

    // HTTP.
    let app_state = Arc::new(AppState {
        store,
        facade,
        jobs,
        router,
        synchronizer,
        validator,
    });
    let app = rest::router(app_state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.web_host, config.web_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = addr.as_str(), "hindsite API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Drain workers and background services.
    shutdown.cancel();
    for handle in service_handles {
        let _ = handle.await;
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
    shutdown.cancel();
}
