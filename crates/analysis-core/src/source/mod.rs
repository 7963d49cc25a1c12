//! The pluggable source abstraction (spec §4.1) and the registry that maps a
//! source-type tag to a constructor (spec §4.2).

mod registry;

pub use registry::SourceRegistry;

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::task::TaskEvent;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Constructs a [`Source`] from its declarative configuration. Boxed and
/// type-erased so the registry can hold heterogeneous source types behind
/// one map, in the same spirit as a type-erased async executor closure.
pub type SourceConstructor =
    Arc<dyn Fn(SourceConfig) -> BoxFuture<'static, Result<Arc<dyn Source>, SourceError>> + Send + Sync>;

/// One producer of [`TaskEvent`]s from a single origin (database, message
/// bus, webhook). State machine: `Created -> Running -> Stopping -> Stopped`.
/// `start`/`stop` must be idempotent; all producer work runs on a background
/// task owned by the source so `start` never blocks indefinitely.
#[async_trait]
pub trait Source: Send + Sync {
    /// Tag identifying this source's implementation, from a closed set
    /// (`"database"`, `"message-bus"`, `"webhook"`, ...).
    fn source_type(&self) -> &str;

    /// Instance label, distinct across sources sharing the same `source_type`.
    fn name(&self) -> &str;

    /// Spawns the background producer task. Idempotent: a second call while
    /// already running is a no-op.
    async fn start(&self, ctx: CancellationToken) -> Result<(), SourceError>;

    /// Signals the producer to drain and stop, then closes its output
    /// stream. Idempotent.
    async fn stop(&self);

    /// Takes ownership of this source's event stream. Must be called exactly
    /// once per `start`; the stream ends only after `stop` completes drain.
    fn tasks(&self) -> BoxStream<'static, TaskEvent>;

    /// Acknowledges successful processing of `event`.
    async fn ack(&self, event: &TaskEvent) -> Result<(), SourceError>;

    /// Records that `event` could not be processed, with a human-readable
    /// `reason` (e.g. "task queue full", "empty input file").
    async fn nack(&self, event: &TaskEvent, reason: &str) -> Result<(), SourceError>;

    /// Cheap liveness probe; does not imply the producer loop is healthy,
    /// only that the underlying origin is reachable.
    async fn health_check(&self) -> Result<(), SourceError>;
}
