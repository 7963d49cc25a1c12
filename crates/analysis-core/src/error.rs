//! Error taxonomy for the ingestion and scheduling core.
//!
//! Every layer wraps the error it propagates with a prefix identifying the
//! step that failed, so an operator reading logs can locate the failure
//! without a stack trace (see the propagation policy in the top-level spec).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while constructing the core (sources, registry, scheduler).
/// These are fatal: the service exits non-zero before accepting any work.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("unknown source type '{0}'")]
    UnknownSourceType(String),

    #[error("missing required option '{option}' for source '{source}'")]
    MissingOption { source: String, option: String },

    #[error("option '{option}' for source '{source}' has the wrong type: {reason}")]
    InvalidOption {
        source: String,
        option: String,
        reason: String,
    },

    #[error("invalid scheduler config: {0}")]
    InvalidScheduler(String),

    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors raised by a [`crate::source::Source`] implementation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SourceError {
    #[error("source configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A transient producer error (store unreachable, bus disconnect). Logged
    /// by the source itself; the producer loop retries on its own cadence.
    #[error("transient source error: {0}")]
    Transient(String),

    /// A permanent misconfiguration discovered at `start`. Fatal to this
    /// source; the aggregator treats it as fatal for the whole service.
    #[error("fatal source error: {0}")]
    Fatal(String),

    #[error("ack/nack failed: {0}")]
    AckNack(String),
}

/// Errors raised by the [`crate::processor::TaskProcessor`] pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProcessorError {
    #[error("failed to stage work directory: {0}")]
    Stage(String),

    #[error("failed to download result file: {0}")]
    Download(String),

    #[error("no analyzer found for task-type={task_type:?} profiler-type={profiler_type:?}")]
    AnalyzerNotFound {
        task_type: crate::task::TaskType,
        profiler_type: crate::task::ProfilerType,
    },

    #[error("empty input file")]
    EmptyInput,

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("failed to persist result: {0}")]
    PersistResult(String),
}

/// Top-level error type unifying the layers above for code that spans them
/// (the aggregator and scheduler).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),
}
