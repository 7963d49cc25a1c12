//! Admits task events onto a bounded queue and dispatches them to a fixed
//! worker pool (spec §4.4). Three cooperating loops run until cancellation:
//! the event loop (admission), the dispatch loop (worker spawn) and a
//! 30-second rules refresher.

use crate::analysis::SuggestionRule;
use crate::config::SchedulerConfig;
use crate::error::SourceError;
use crate::processor::{ResultStore, TaskProcessor};
use crate::task::TaskEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The ack/nack sink the scheduler routes finished events back to.
/// [`crate::aggregator::SourceAggregator`] is the only production
/// implementation; the indirection exists so tests can substitute a fake.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn ack(&self, event: &TaskEvent) -> Result<(), SourceError>;
    async fn nack(&self, event: &TaskEvent, reason: &str) -> Result<(), SourceError>;
}

#[async_trait]
impl EventSink for crate::aggregator::SourceAggregator {
    async fn ack(&self, event: &TaskEvent) -> Result<(), SourceError> {
        crate::aggregator::SourceAggregator::ack(self, event).await
    }
    async fn nack(&self, event: &TaskEvent, reason: &str) -> Result<(), SourceError> {
        crate::aggregator::SourceAggregator::nack(self, event, reason).await
    }
}

/// Point-in-time counters surfaced on the `/metrics` endpoint by the
/// observability layer. Updated only by the scheduler's own loops.
#[derive(Default)]
pub struct SchedulerMetrics {
    pub tasks_admitted_total: AtomicU64,
    pub tasks_acked_total: AtomicU64,
    pub tasks_nacked_total: AtomicU64,
    pub queue_depth: AtomicUsize,
}

/// Fire-and-forget hook for the two scheduler events a periodic gauge poll
/// cannot reconstruct after the fact: a nack's reason label, and a
/// completed task's processing duration. The observability layer is the
/// only production implementer, wiring these into Prometheus label
/// counters and a histogram; tests use the no-op default.
pub trait MetricsRecorder: Send + Sync {
    fn record_admitted(&self);
    fn record_acked(&self);
    fn record_nack(&self, reason: &str);
    fn record_processing_duration(&self, seconds: f64);
}

#[derive(Default)]
struct NullMetricsRecorder;

impl MetricsRecorder for NullMetricsRecorder {
    fn record_admitted(&self) {}
    fn record_acked(&self) {}
    fn record_nack(&self, _reason: &str) {}
    fn record_processing_duration(&self, _seconds: f64) {}
}

/// Owns the worker-slot semaphore, the bounded task queue, and the three
/// long-lived loops described in spec §4.4.
pub struct Scheduler {
    config: SchedulerConfig,
    sink: Arc<dyn EventSink>,
    processor: Arc<TaskProcessor>,
    rule_store: Arc<dyn ResultStore>,
    semaphore: Arc<Semaphore>,
    rules: Arc<Mutex<Vec<SuggestionRule>>>,
    metrics: Arc<SchedulerMetrics>,
    recorder: Arc<dyn MetricsRecorder>,
    stop_token: Mutex<CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        sink: Arc<dyn EventSink>,
        processor: Arc<TaskProcessor>,
        rule_store: Arc<dyn ResultStore>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.worker_count));
        Self {
            config,
            sink,
            processor,
            rule_store,
            semaphore,
            rules: Arc::new(Mutex::new(Vec::new())),
            metrics: Arc::new(SchedulerMetrics::default()),
            recorder: Arc::new(NullMetricsRecorder),
            stop_token: Mutex::new(CancellationToken::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Attaches the observability layer's [`MetricsRecorder`]. Optional;
    /// defaults to a no-op so existing callers and tests are unaffected.
    #[must_use]
    pub fn with_metrics_recorder(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        Arc::clone(&self.metrics)
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Currently-running workers, derived from the semaphore's free permits
    /// (spec §4.4: `active_workers = worker_count - slots_available`).
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.config.worker_count.saturating_sub(self.semaphore.available_permits())
    }

    /// Spawns the event loop, dispatch loop and rules refresher. `ctx`
    /// cancellation cascades into this scheduler's own stop signal; calling
    /// [`Scheduler::stop`] cancels only this scheduler.
    pub async fn start(&self, ctx: CancellationToken, events: BoxStream<'static, TaskEvent>) {
        let stop_token = ctx.child_token();
        *self.stop_token.lock().await = stop_token.clone();

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity());

        if let Ok(rules) = self.rule_store.get_rules().await {
            *self.rules.lock().await = rules;
        }

        let event_loop = tokio::spawn(event_loop(
            stop_token.clone(),
            events,
            queue_tx,
            Arc::clone(&self.sink),
            Arc::clone(&self.semaphore),
            self.config.clone(),
            Arc::clone(&self.metrics),
            Arc::clone(&self.recorder),
        ));
        let dispatch_loop = tokio::spawn(dispatch_loop(
            stop_token.clone(),
            ctx.clone(),
            queue_rx,
            Arc::clone(&self.semaphore),
            Arc::clone(&self.sink),
            Arc::clone(&self.processor),
            Arc::clone(&self.rules),
            Arc::clone(&self.metrics),
            Arc::clone(&self.recorder),
        ));
        let rules_refresher = tokio::spawn(rules_refresher(
            stop_token,
            Arc::clone(&self.rule_store),
            Arc::clone(&self.rules),
        ));

        *self.handles.lock().await = vec![event_loop, dispatch_loop, rules_refresher];
    }

    /// Cancels the stop signal and waits for all three loops — and, in turn,
    /// every in-flight worker — to finish.
    pub async fn stop(&self) {
        self.stop_token.lock().await.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler loop task panicked during shutdown");
            }
        }
    }
}

async fn event_loop(
    stop_token: CancellationToken,
    mut events: BoxStream<'static, TaskEvent>,
    queue_tx: mpsc::Sender<TaskEvent>,
    sink: Arc<dyn EventSink>,
    semaphore: Arc<Semaphore>,
    config: SchedulerConfig,
    metrics: Arc<SchedulerMetrics>,
    recorder: Arc<dyn MetricsRecorder>,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = stop_token.cancelled() => break,
            next = events.next() => match next {
                Some(event) => event,
                None => break,
            },
        };

        let active = config.worker_count.saturating_sub(semaphore.available_permits());
        let admitted = if event.priority.is_high() {
            active < config.worker_count
        } else {
            active < config.worker_count.saturating_sub(config.priority_slots)
        };
        if !admitted {
            debug!(event_id = %event.event_id, active, "event rejected by admission; dropped for this tick");
            continue;
        }

        match queue_tx.try_send(event) {
            Ok(()) => {
                metrics.tasks_admitted_total.fetch_add(1, Ordering::SeqCst);
                metrics.queue_depth.fetch_add(1, Ordering::SeqCst);
                recorder.record_admitted();
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics.tasks_nacked_total.fetch_add(1, Ordering::SeqCst);
                recorder.record_nack("task queue full");
                if let Err(e) = sink.nack(&event, "task queue full").await {
                    warn!(event_id = %event.event_id, error = %e, "failed to nack task queue full event");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_loop(
    stop_token: CancellationToken,
    ctx: CancellationToken,
    mut queue_rx: mpsc::Receiver<TaskEvent>,
    semaphore: Arc<Semaphore>,
    sink: Arc<dyn EventSink>,
    processor: Arc<TaskProcessor>,
    rules: Arc<Mutex<Vec<SuggestionRule>>>,
    metrics: Arc<SchedulerMetrics>,
    recorder: Arc<dyn MetricsRecorder>,
) {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let event = tokio::select! {
            biased;
            () = stop_token.cancelled() => break,
            next = queue_rx.recv() => match next {
                Some(event) => event,
                None => break,
            },
        };
        metrics.queue_depth.fetch_sub(1, Ordering::SeqCst);

        let permit = tokio::select! {
            biased;
            () = stop_token.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let rules_snapshot = rules.lock().await.clone();
        let processor = Arc::clone(&processor);
        let sink = Arc::clone(&sink);
        let metrics = Arc::clone(&metrics);
        let recorder = Arc::clone(&recorder);
        let ctx = ctx.clone();
        workers.push(tokio::spawn(async move {
            let _permit = permit;
            let started_at = Instant::now();
            let outcome = processor.process(ctx, &event, &rules_snapshot).await;
            recorder.record_processing_duration(started_at.elapsed().as_secs_f64());
            match outcome {
                Ok(()) => {
                    metrics.tasks_acked_total.fetch_add(1, Ordering::SeqCst);
                    recorder.record_acked();
                    if let Err(e) = sink.ack(&event).await {
                        warn!(event_id = %event.event_id, error = %e, "failed to ack completed task");
                    }
                }
                Err(e) => {
                    metrics.tasks_nacked_total.fetch_add(1, Ordering::SeqCst);
                    recorder.record_nack(&e.to_string());
                    if let Err(nack_err) = sink.nack(&event, &e.to_string()).await {
                        warn!(event_id = %event.event_id, error = %nack_err, "failed to nack failed task");
                    }
                }
            }
        }));
        workers.retain(|handle| !handle.is_finished());
    }

    for handle in workers {
        if let Err(e) = handle.await {
            warn!(error = %e, "worker task panicked");
        }
    }
}

async fn rules_refresher(
    stop_token: CancellationToken,
    rule_store: Arc<dyn ResultStore>,
    rules: Arc<Mutex<Vec<SuggestionRule>>>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            biased;
            () = stop_token.cancelled() => break,
            _ = interval.tick() => {
                match rule_store.get_rules().await {
                    Ok(fetched) => *rules.lock().await = fetched,
                    Err(e) => warn!(error = %e, "failed to refresh suggestion rules"),
                }
            }
        }
    }
}
