//! A configurable fake [`Source`] for exercising the aggregator and
//! scheduler without a live backend.

use analysis_core::error::SourceError;
use analysis_core::source::Source;
use analysis_core::task::{AckToken, Priority, RequestParams, Task, TaskEvent, TaskType, ProfilerType};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

/// A fake source whose pending tasks, start/stop behavior, and ack/nack
/// bookkeeping are all controlled by the test.
///
/// ```rust,ignore
/// let source = FakeSource::new("database", "primary");
/// source.push_pending_task("task-uuid");
/// ```
pub struct FakeSource {
    source_type: String,
    name: String,
    pending: Mutex<VecDeque<TaskEvent>>,
    acked: AtomicUsize,
    nacked: AtomicUsize,
    started: AtomicBool,
    stopped: AtomicBool,
    fail_next_start: Mutex<Option<String>>,
    next_row_id: AtomicUsize,
}

impl FakeSource {
    #[must_use]
    pub fn new(source_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            name: name.into(),
            pending: Mutex::new(VecDeque::new()),
            acked: AtomicUsize::new(0),
            nacked: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            fail_next_start: Mutex::new(None),
            next_row_id: AtomicUsize::new(1),
        }
    }

    /// Queues a minimal pending task with the given UUID, to be emitted the
    /// next time [`Source::tasks`] is polled.
    pub fn push_pending_task(&self, uuid: impl Into<String>) {
        let row_id = self.next_row_id.fetch_add(1, Ordering::SeqCst) as i64;
        let now = SystemTime::now();
        let task = Task {
            id: row_id,
            uuid: uuid.into(),
            task_type: TaskType::Generic,
            profiler_type: ProfilerType::Perf,
            input_reference: "fake://input".to_string(),
            parent_uuid: None,
            request_params: RequestParams::default(),
            created_at: now,
            updated_at: now,
        };
        let event = TaskEvent {
            event_id: task.uuid.clone(),
            task,
            source_type: self.source_type.clone(),
            source_name: self.name.clone(),
            priority: Priority::NORMAL,
            metadata: Default::default(),
            ack_token: AckToken::RowId(row_id),
        };
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).push_back(event);
    }

    /// Makes the next call to `start` fail with `reason`, then start as
    /// normal thereafter.
    pub fn fail_next_start(&self, reason: impl Into<String>) {
        *self.fail_next_start.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    #[must_use]
    pub fn acked_count(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn nacked_count(&self) -> usize {
        self.nacked.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for FakeSource {
    fn source_type(&self) -> &str {
        &self.source_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, _ctx: CancellationToken) -> Result<(), SourceError> {
        if let Some(reason) = self.fail_next_start.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Err(SourceError::Fatal(reason));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn tasks(&self) -> BoxStream<'static, TaskEvent> {
        let drained: Vec<TaskEvent> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        Box::pin(stream::iter(drained))
    }

    async fn ack(&self, _event: &TaskEvent) -> Result<(), SourceError> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self, _event: &TaskEvent, _reason: &str) -> Result<(), SourceError> {
        self.nacked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pushed_tasks_are_drained_on_first_poll() {
        let source = FakeSource::new("database", "primary");
        source.push_pending_task("U1");
        source.push_pending_task("U2");

        let events: Vec<_> = futures::StreamExt::collect(source.tasks()).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].task.uuid, "U1");
        assert_eq!(events[1].task.uuid, "U2");
    }

    #[tokio::test]
    async fn fail_next_start_fails_exactly_once() {
        let source = FakeSource::new("database", "primary");
        source.fail_next_start("boom");

        let first = source.start(CancellationToken::new()).await;
        assert!(first.is_err());
        let second = source.start(CancellationToken::new()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn ack_and_nack_increment_independent_counters() {
        let source = FakeSource::new("database", "primary");
        source.push_pending_task("U1");
        let event = futures::StreamExt::next(&mut source.tasks()).await.unwrap();

        source.ack(&event).await.unwrap();
        source.nack(&event, "retry").await.unwrap();

        assert_eq!(source.acked_count(), 1);
        assert_eq!(source.nacked_count(), 1);
    }

    #[tokio::test]
    async fn stop_marks_was_stopped() {
        let source = FakeSource::new("database", "primary");
        assert!(!source.was_stopped());
        source.stop().await;
        assert!(source.was_stopped());
    }
}
