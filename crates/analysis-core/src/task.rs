//! The data model shared by every source, the aggregator, the scheduler and the processor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// The kind of profiling analysis a [`Task`] requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Generic,
    JavaCpu,
    Tracing,
    Timing,
    MemLeak,
    PprofMemory,
    JavaHeap,
}

/// The upstream profiler that produced the task's input artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfilerType {
    Perf,
    AsyncAlloc,
    Pprof,
}

/// Lifecycle status of a task as recorded by a durable source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Request parameters attached to a task. At minimum carries the duration hint
/// used for priority classification; analyzers may read further fields out of
/// `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestParams {
    /// Hint, in milliseconds, of how long the profiled workload ran.
    /// Tasks below the configured threshold are classified high-priority.
    pub duration_hint_ms: Option<u64>,
    /// Free-form extra parameters forwarded to the analyzer unchanged.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// The unit of work that flows through the ingestion and scheduling core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identity unique within the task's originating store (e.g. a row id).
    pub id: i64,
    /// Globally-unique textual identifier, stable across the task's lifetime.
    pub uuid: String,
    pub task_type: TaskType,
    pub profiler_type: ProfilerType,
    /// Artifact-store key resolving to the task's input (collapsed stack, heap dump, ...).
    pub input_reference: String,
    /// UUID of the aggregate (master) task this task is a sub-task of, if any.
    pub parent_uuid: Option<String>,
    pub request_params: RequestParams,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Task {
    /// A task is high-priority iff its request parameters mark it so: a duration
    /// hint at or below `threshold_ms` indicates a short-lived profile whose
    /// results an operator is likely waiting on interactively.
    #[must_use]
    pub fn is_high_priority(&self, threshold_ms: u64) -> bool {
        self.request_params
            .duration_hint_ms
            .is_some_and(|d| d <= threshold_ms)
    }
}

/// Coarse priority carried by a [`TaskEvent`]. `0` is normal; any value `>= 1` is high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    pub const NORMAL: Priority = Priority(0);
    pub const HIGH: Priority = Priority(1);

    #[must_use]
    pub fn is_high(self) -> bool {
        self.0 >= 1
    }
}

/// An opaque token whose interpretation is private to the producing source:
/// a database row id, a Kafka offset, or a webhook request handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AckToken {
    RowId(i64),
    Offset { partition: i32, offset: i64 },
    RequestHandle(String),
}

/// The unit crossing the source -> scheduler boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Stable identifier for this event, distinct from the task's own uuid so
    /// that redelivery of the same task produces a fresh event id.
    pub event_id: String,
    pub task: Task,
    pub source_type: String,
    pub source_name: String,
    pub priority: Priority,
    /// Free-form diagnostics, e.g. the originating queue/topic/row.
    pub metadata: HashMap<String, String>,
    pub ack_token: AckToken,
}

impl TaskEvent {
    /// The `(source_type, source_name)` pair used to route ack/nack back to
    /// the originating source.
    #[must_use]
    pub fn routing_key(&self) -> (String, String) {
        (self.source_type.clone(), self.source_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_hint(hint_ms: Option<u64>) -> Task {
        Task {
            id: 1,
            uuid: "U1".to_string(),
            task_type: TaskType::JavaCpu,
            profiler_type: ProfilerType::Perf,
            input_reference: "raw/U1.collapsed".to_string(),
            parent_uuid: None,
            request_params: RequestParams {
                duration_hint_ms: hint_ms,
                extra: HashMap::new(),
            },
            created_at: SystemTime::now(),
            updated_at: SystemTime::now(),
        }
    }

    #[test]
    fn priority_classification_is_pure_function_of_request_params() {
        let short = task_with_hint(Some(500));
        let long = task_with_hint(Some(60_000));
        let unset = task_with_hint(None);

        assert!(short.is_high_priority(1000));
        assert!(short.is_high_priority(1000)); // calling twice yields the same answer
        assert!(!long.is_high_priority(1000));
        assert!(!unset.is_high_priority(1000));
    }

    #[test]
    fn priority_is_high_iff_at_least_one() {
        assert!(!Priority::NORMAL.is_high());
        assert!(Priority::HIGH.is_high());
        assert!(Priority(2).is_high());
    }
}
