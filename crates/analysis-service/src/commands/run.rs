//! `dashflow-analysis run`: loads configuration, wires every collaborator
//! (sources, artifact store, result store, processor, scheduler,
//! observability) and serves until SIGINT/SIGTERM (spec §9 "Process
//! lifecycle").

use crate::facade::UnconfiguredAnalyzerFacade;
use crate::shutdown::shutdown_signal;
use analysis_core::config::ServiceConfig;
use analysis_core::{Scheduler, Source, SourceAggregator, SourceRegistry};
use analysis_core::processor::TaskProcessor;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to a TOML configuration file. Falls back to
    /// `DASHFLOW_ANALYSIS_CONFIG` and compiled-in defaults when absent.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = ServiceConfig::load(args.config.as_deref())?;
    analysis_observability::init_tracing(&config.log)?;

    info!(version = env!("CARGO_PKG_VERSION"), "dashflow-analysis starting");

    let metrics = Arc::new(analysis_observability::ServiceMetrics::new()?);

    let artifact_store = Arc::new(analysis_artifact_store::FilesystemArtifactStore::new(
        config.artifact_store.root_dir.clone(),
    ));
    let result_store = Arc::new(
        analysis_result_store::PostgresResultStore::connect(
            &config.result_store.connection_string,
            &config.result_store.table_prefix,
            &config.result_store.tasks_table,
        )
        .await?,
    );
    let analyzer_facade = Arc::new(UnconfiguredAnalyzerFacade);
    let processor = Arc::new(TaskProcessor::new(
        artifact_store,
        result_store.clone(),
        analyzer_facade,
        config.data_dir.clone(),
    ));

    let mut registry = SourceRegistry::new();
    registry.register("database", analysis_db_source::DatabaseSource::constructor());
    registry.register("message-bus", analysis_bus_source::MessageBusSource::constructor());
    registry.register("webhook", analysis_webhook_source::WebhookSource::constructor());

    let sources: Vec<Arc<dyn Source>> = registry.create_all(config.sources.clone()).await?;
    let aggregator = Arc::new(SourceAggregator::new(sources, config.scheduler.queue_capacity()));

    let scheduler = Arc::new(
        Scheduler::new(config.scheduler.clone(), aggregator.clone(), processor, result_store)
            .with_metrics_recorder(metrics.clone()),
    );

    let ctx = CancellationToken::new();
    let events = aggregator.start(ctx.clone()).await?;
    scheduler.start(ctx.clone(), events).await;

    let updater_stop = CancellationToken::new();
    let updater = analysis_observability::spawn_metrics_updater(
        metrics.clone(),
        scheduler.clone(),
        aggregator.clone(),
        updater_stop.clone(),
    );

    let metrics_server = if config.metrics.enabled {
        let addr = config.metrics.bind_addr.parse()?;
        let shutdown = ctx.clone();
        Some(tokio::spawn(async move { analysis_observability::serve(addr, metrics, shutdown).await }))
    } else {
        None
    };

    shutdown_signal().await;
    info!("shutdown signal received; draining in-flight work");

    ctx.cancel();
    scheduler.stop().await;
    aggregator.stop().await;
    updater_stop.cancel();
    if let Err(e) = updater.await {
        warn!(error = %e, "metrics updater task panicked during shutdown");
    }

    if let Some(handle) = metrics_server {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "metrics server exited with an error"),
            Err(e) => error!(error = %e, "metrics server task panicked during shutdown"),
        }
    }

    info!("dashflow-analysis shutdown complete");
    Ok(())
}
