//! Task-ingestion and scheduling core for the profiling analysis service.
//!
//! Wires together pluggable [`source::Source`]s, the [`aggregator`] that
//! fans them into one event stream, the [`scheduler`] that dispatches tasks
//! to a bounded worker pool, and the [`processor`] that runs the analyze /
//! persist / advise pipeline for each task.

pub mod advisor;
pub mod aggregator;
pub mod analysis;
pub mod config;
pub mod error;
pub mod processor;
pub mod scheduler;
pub mod source;
pub mod task;

pub use aggregator::SourceAggregator;
pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use scheduler::{MetricsRecorder, Scheduler};
pub use source::{Source, SourceRegistry};
pub use task::{Task, TaskEvent};
