//! Observability for the profiling analysis service (spec C10): structured
//! `tracing` initialization and the Prometheus `/metrics` surface described
//! in spec §6.
//!
//! [`metrics::ServiceMetrics`] is the single source of truth: the scheduler
//! pushes into it directly via [`analysis_core::scheduler::MetricsRecorder`]
//! for per-occurrence events (admitted, acked, nacked-by-reason, processing
//! duration), while [`updater::spawn_metrics_updater`] polls it with the
//! point-in-time gauges (`active_workers`, `worker_count`,
//! `task_queue_depth`, `source_health`) that have no natural push site.

pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod updater;

pub use error::{Error, Result};
pub use logging::init_tracing;
pub use metrics::ServiceMetrics;
pub use server::serve;
pub use updater::spawn_metrics_updater;
