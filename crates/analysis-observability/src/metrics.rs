//! Prometheus metrics for the profiling analysis service (spec C10, §6).
//!
//! [`ServiceMetrics`] owns its own [`Registry`] rather than the process-wide
//! default one, so a test can build an isolated instance without stepping on
//! metrics registered elsewhere in the process.

use crate::error::{Error, Result};
use analysis_core::scheduler::MetricsRecorder;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

/// Task processing-duration buckets, in seconds. Profiling tasks commonly run
/// from a few hundred milliseconds up to several minutes.
const PROCESSING_DURATION_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Prometheus metrics for the scheduler, its workers, and its sources.
pub struct ServiceMetrics {
    registry: Registry,

    pub active_workers: IntGauge,
    pub worker_count: IntGauge,
    pub task_queue_depth: IntGauge,

    pub tasks_admitted_total: IntCounter,
    pub tasks_acked_total: IntCounter,
    pub tasks_nacked_total: IntCounterVec,

    pub task_processing_duration_seconds: Histogram,

    pub source_health: IntGaugeVec,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self> {
        let active_workers = IntGauge::new("active_workers", "Workers currently processing a task")
            .map_err(|source| Error::Register { name: "active_workers", source })?;
        let worker_count = IntGauge::new("worker_count", "Configured worker pool size")
            .map_err(|source| Error::Register { name: "worker_count", source })?;
        let task_queue_depth = IntGauge::new("task_queue_depth", "Events admitted but not yet dispatched")
            .map_err(|source| Error::Register { name: "task_queue_depth", source })?;

        let tasks_admitted_total = IntCounter::new("tasks_admitted_total", "Events admitted onto the task queue")
            .map_err(|source| Error::Register { name: "tasks_admitted_total", source })?;
        let tasks_acked_total = IntCounter::new("tasks_acked_total", "Tasks processed successfully")
            .map_err(|source| Error::Register { name: "tasks_acked_total", source })?;
        let tasks_nacked_total = IntCounterVec::new(
            Opts::new("tasks_nacked_total", "Tasks that could not be processed, by reason"),
            &["reason"],
        )
        .map_err(|source| Error::Register { name: "tasks_nacked_total", source })?;

        let task_processing_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "task_processing_duration_seconds",
                "Time spent in the processor's analyze/persist/advise pipeline",
            )
            .buckets(PROCESSING_DURATION_BUCKETS.to_vec()),
        )
        .map_err(|source| Error::Register { name: "task_processing_duration_seconds", source })?;

        let source_health = IntGaugeVec::new(
            Opts::new("source_health", "1 if the source's last health check succeeded, else 0"),
            &["source_type", "source_name"],
        )
        .map_err(|source| Error::Register { name: "source_health", source })?;

        registry
            .register(Box::new(active_workers.clone()))
            .map_err(|source| Error::Register { name: "active_workers", source })?;
        registry
            .register(Box::new(worker_count.clone()))
            .map_err(|source| Error::Register { name: "worker_count", source })?;
        registry
            .register(Box::new(task_queue_depth.clone()))
            .map_err(|source| Error::Register { name: "task_queue_depth", source })?;
        registry
            .register(Box::new(tasks_admitted_total.clone()))
            .map_err(|source| Error::Register { name: "tasks_admitted_total", source })?;
        registry
            .register(Box::new(tasks_acked_total.clone()))
            .map_err(|source| Error::Register { name: "tasks_acked_total", source })?;
        registry
            .register(Box::new(tasks_nacked_total.clone()))
            .map_err(|source| Error::Register { name: "tasks_nacked_total", source })?;
        registry
            .register(Box::new(task_processing_duration_seconds.clone()))
            .map_err(|source| Error::Register { name: "task_processing_duration_seconds", source })?;
        registry
            .register(Box::new(source_health.clone()))
            .map_err(|source| Error::Register { name: "source_health", source })?;

        Ok(Self {
            registry,
            active_workers,
            worker_count,
            task_queue_depth,
            tasks_admitted_total,
            tasks_acked_total,
            tasks_nacked_total,
            task_processing_duration_seconds,
            source_health,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes every registered metric family in Prometheus text exposition
    /// format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        encoder.encode_to_string(&self.registry.gather()).map_err(Error::Encode)
    }

    /// Sets `source_health{source_type,source_name}` to 1 or 0.
    pub fn set_source_health(&self, source_type: &str, source_name: &str, healthy: bool) {
        self.source_health
            .with_label_values(&[source_type, source_name])
            .set(i64::from(healthy));
    }
}

/// Wires the scheduler's fire-and-forget events directly into the
/// corresponding Prometheus counters and histogram, so `tasks_nacked_total`'s
/// `reason` label and `task_processing_duration_seconds`'s observations are
/// never reconstructed from a later poll.
impl MetricsRecorder for ServiceMetrics {
    fn record_admitted(&self) {
        self.tasks_admitted_total.inc();
    }

    fn record_acked(&self) {
        self.tasks_acked_total.inc();
    }

    fn record_nack(&self, reason: &str) {
        self.tasks_nacked_total.with_label_values(&[reason]).inc();
    }

    fn record_processing_duration(&self, seconds: f64) {
        self.task_processing_duration_seconds.observe(seconds);
    }
}
