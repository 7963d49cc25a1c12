//! Periodic gauge refresh for the metrics that a point-of-occurrence hook
//! cannot express: `active_workers`, `worker_count`, `task_queue_depth` and
//! `source_health` are all point-in-time snapshots, so they are polled on an
//! interval rather than pushed (contrast with [`crate::metrics::ServiceMetrics`]'s
//! [`analysis_core::scheduler::MetricsRecorder`] impl, which pushes).

use crate::metrics::ServiceMetrics;
use analysis_core::aggregator::SourceAggregator;
use analysis_core::scheduler::Scheduler;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Spawns the background task that keeps [`ServiceMetrics`]'s gauges current.
/// Stops when `stop_token` is cancelled.
pub fn spawn_metrics_updater(
    metrics: Arc<ServiceMetrics>,
    scheduler: Arc<Scheduler>,
    aggregator: Arc<SourceAggregator>,
    stop_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(metrics, scheduler, aggregator, stop_token, DEFAULT_POLL_INTERVAL))
}

async fn run(
    metrics: Arc<ServiceMetrics>,
    scheduler: Arc<Scheduler>,
    aggregator: Arc<SourceAggregator>,
    stop_token: CancellationToken,
    poll_interval: Duration,
) {
    let mut interval = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            biased;
            () = stop_token.cancelled() => break,
            _ = interval.tick() => {
                refresh(&metrics, &scheduler, &aggregator).await;
            }
        }
    }
}

async fn refresh(metrics: &ServiceMetrics, scheduler: &Scheduler, aggregator: &SourceAggregator) {
    metrics.worker_count.set(scheduler.worker_count() as i64);
    metrics.active_workers.set(scheduler.active_workers() as i64);

    let scheduler_metrics = scheduler.metrics();
    metrics
        .task_queue_depth
        .set(scheduler_metrics.queue_depth.load(Ordering::SeqCst) as i64);

    for source in aggregator.sources() {
        let healthy = source.health_check().await.is_ok();
        metrics.set_source_health(source.source_type(), source.name(), healthy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::config::SchedulerConfig;
    use analysis_core::processor::{AnalyzerFacade, ArtifactStore, TaskProcessor};
    use analysis_core::scheduler::EventSink;
    use analysis_core::task::TaskEvent;
    use analysis_testing::{FakeAnalyzerFacade, FakeArtifactStore, FakeResultStore, FakeSource};
    use async_trait::async_trait;

    struct NoopSink;

    #[async_trait]
    impl EventSink for NoopSink {
        async fn ack(&self, _event: &TaskEvent) -> Result<(), analysis_core::error::SourceError> {
            Ok(())
        }
        async fn nack(&self, _event: &TaskEvent, _reason: &str) -> Result<(), analysis_core::error::SourceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn refresh_copies_worker_gauges_and_polls_source_health() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(FakeArtifactStore::new());
        let results = Arc::new(FakeResultStore::new());
        let facade: Arc<dyn AnalyzerFacade> = Arc::new(FakeAnalyzerFacade::with_default_response());
        let processor = Arc::new(TaskProcessor::new(artifacts, results.clone(), facade, dir.path()));

        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig { worker_count: 3, ..SchedulerConfig::default() },
            Arc::new(NoopSink),
            processor,
            results,
        ));

        let source = Arc::new(FakeSource::new("database", "primary"));
        let aggregator = Arc::new(SourceAggregator::new(vec![source.clone()], 8));

        let metrics = Arc::new(ServiceMetrics::new().unwrap());
        refresh(&metrics, &scheduler, &aggregator).await;

        assert_eq!(metrics.worker_count.get(), 3);
        assert_eq!(metrics.active_workers.get(), 0);
        let output = metrics.encode().unwrap();
        assert!(output.contains(r#"source_health{source_name="primary",source_type="database"} 1"#));
    }
}
