//! Exercises `SourceAggregator` and `Scheduler` wired together exactly as
//! `dashflow-analysis run` wires them, rather than handing the scheduler a
//! hand-built event stream (see the unit tests in `scheduler.rs`).

use analysis_core::config::SchedulerConfig;
use analysis_core::processor::{AnalyzerFacade, ArtifactStore};
use analysis_core::{Scheduler, Source, SourceAggregator};
use analysis_core::processor::TaskProcessor;
use analysis_testing::{FakeAnalyzerFacade, FakeArtifactStore, FakeResultStore, FakeSource};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn processor_with_fakes(data_dir: &std::path::Path) -> Arc<TaskProcessor> {
    let artifacts = Arc::new(FakeArtifactStore::new());
    artifacts.seed_input("fake://input", b"data");
    let artifacts: Arc<dyn ArtifactStore> = artifacts;
    let results = Arc::new(FakeResultStore::new());
    let facade: Arc<dyn AnalyzerFacade> = Arc::new(FakeAnalyzerFacade::with_default_response());
    Arc::new(TaskProcessor::new(artifacts, results, facade, data_dir))
}

#[tokio::test]
async fn a_task_pushed_by_a_source_is_processed_and_acked_back_to_it() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor_with_fakes(dir.path());
    let rule_store = Arc::new(FakeResultStore::new());

    let source = Arc::new(FakeSource::new("database", "primary"));
    source.push_pending_task("U1");
    let source_dyn: Arc<dyn Source> = source.clone();
    let aggregator = Arc::new(SourceAggregator::new(vec![source_dyn], 8));

    let config = SchedulerConfig {
        poll_interval: Duration::from_secs(30),
        worker_count: 2,
        priority_slots: 0,
        task_batch_size: 4,
    };
    let scheduler = Scheduler::new(config, aggregator.clone(), processor, rule_store);

    let ctx = CancellationToken::new();
    let events = aggregator.start(ctx.clone()).await.unwrap();
    scheduler.start(ctx.clone(), events).await;
    scheduler.stop().await;
    aggregator.stop().await;

    assert_eq!(source.acked_count(), 1);
    assert_eq!(source.nacked_count(), 0);
    assert!(source.was_started());
    assert!(source.was_stopped());
    assert_eq!(scheduler.active_workers(), 0);
}

#[tokio::test]
async fn two_sources_are_fanned_into_one_scheduler_and_each_gets_its_own_ack() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor_with_fakes(dir.path());
    let rule_store = Arc::new(FakeResultStore::new());

    let db_source = Arc::new(FakeSource::new("database", "primary"));
    db_source.push_pending_task("U1");
    let webhook_source = Arc::new(FakeSource::new("webhook", "intake"));
    webhook_source.push_pending_task("U2");

    let sources: Vec<Arc<dyn Source>> = vec![db_source.clone(), webhook_source.clone()];
    let aggregator = Arc::new(SourceAggregator::new(sources, 8));

    let config = SchedulerConfig {
        poll_interval: Duration::from_secs(30),
        worker_count: 4,
        priority_slots: 0,
        task_batch_size: 4,
    };
    let scheduler = Scheduler::new(config, aggregator.clone(), processor, rule_store);

    let ctx = CancellationToken::new();
    let events = aggregator.start(ctx.clone()).await.unwrap();
    scheduler.start(ctx.clone(), events).await;
    scheduler.stop().await;
    aggregator.stop().await;

    assert_eq!(db_source.acked_count(), 1);
    assert_eq!(webhook_source.acked_count(), 1);
}

#[tokio::test]
async fn shutdown_drains_in_flight_work_before_stopping_sources() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor_with_fakes(dir.path());
    let rule_store = Arc::new(FakeResultStore::new());

    let source = Arc::new(FakeSource::new("database", "primary"));
    for uuid in ["U1", "U2", "U3"] {
        source.push_pending_task(uuid);
    }
    let source_dyn: Arc<dyn Source> = source.clone();
    let aggregator = Arc::new(SourceAggregator::new(vec![source_dyn], 8));

    let config = SchedulerConfig {
        poll_interval: Duration::from_secs(30),
        worker_count: 1,
        priority_slots: 0,
        task_batch_size: 4,
    };
    let scheduler = Scheduler::new(config, aggregator.clone(), processor, rule_store);

    let ctx = CancellationToken::new();
    let events = aggregator.start(ctx.clone()).await.unwrap();
    scheduler.start(ctx.clone(), events).await;

    ctx.cancel();
    scheduler.stop().await;
    aggregator.stop().await;

    assert_eq!(source.acked_count(), 3);
    assert_eq!(scheduler.active_workers(), 0);
    assert!(source.was_stopped());
}

#[tokio::test]
async fn a_source_that_fails_to_start_aborts_before_any_task_is_scheduled() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor_with_fakes(dir.path());
    let rule_store = Arc::new(FakeResultStore::new());

    let good = Arc::new(FakeSource::new("database", "good"));
    good.push_pending_task("U1");
    let bad = Arc::new(FakeSource::new("database", "bad"));
    bad.fail_next_start("misconfigured connection string");

    let sources: Vec<Arc<dyn Source>> = vec![good.clone(), bad.clone()];
    let aggregator = Arc::new(SourceAggregator::new(sources, 8));

    let config = SchedulerConfig {
        poll_interval: Duration::from_secs(30),
        worker_count: 2,
        priority_slots: 0,
        task_batch_size: 4,
    };

    let ctx = CancellationToken::new();
    let start_result = aggregator.start(ctx.clone()).await;
    assert!(start_result.is_err());
    assert!(good.was_stopped());

    // Scheduler is never started in this failure path; nothing was processed.
    let scheduler = Scheduler::new(config, aggregator.clone(), processor, rule_store);
    assert_eq!(scheduler.active_workers(), 0);
    assert_eq!(good.acked_count(), 0);
}
