//! The contract at the Analyzer-Facade boundary (spec §3, §6) and the
//! result/advice shapes the processor persists.

use crate::task::{ProfilerType, RequestParams, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Request handed to the resolved [`Analyzer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub task_uuid: String,
    pub task_type: TaskType,
    pub profiler_type: ProfilerType,
    pub input_file: PathBuf,
    pub output_dir: PathBuf,
    pub request_params: RequestParams,
}

/// One entry in a CPU-style top-function table. `tags` carries the coarse
/// markers the advisor pattern-matches against (e.g. `"gc"`, `"lock"`,
/// `"reflection"`); the concrete analyzer populating this is out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopFunctionEntry {
    pub name: String,
    pub self_percent: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One entry in an allocation-mode profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub type_name: String,
    pub allocations_per_sec: f64,
}

/// One thread observed live during profiling, independent of the
/// analyzer's profile-type-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveThreadEntry {
    pub name: String,
    pub state: String,
}

/// Tagged payload discriminating the task's data-type, so the processor can
/// route advice synthesis and formatting without inspecting concrete types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AnalyzerPayload {
    Cpu { top_functions: Vec<TopFunctionEntry> },
    Allocation { allocations: Vec<AllocationEntry> },
    Heap { retained_bytes: u64 },
    MemoryLeak { leak_candidates: Vec<String> },
    Tracing { span_count: u64 },
    PprofBatch { sample_count: u64 },
}

/// A textual diagnostic produced either by an analyzer directly or by the
/// advisor's rule matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub rule_target: Option<String>,
}

/// Response produced by an [`Analyzer`] for one [`AnalysisRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub task_uuid: String,
    pub flame_graph_file: Option<String>,
    pub call_graph_file: Option<String>,
    pub heap_detail_file: Option<String>,
    pub payload: AnalyzerPayload,
    pub total_records: u64,
    /// Threads observed live during profiling; empty for analyzers that
    /// don't track thread state.
    #[serde(default)]
    pub active_threads: Vec<ActiveThreadEntry>,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    /// Free-form output-file manifest beyond the named artifact fields above.
    #[serde(default)]
    pub output_files: HashMap<String, String>,
}

/// Matches a [`TopFunctionEntry`] tag or an allocation rate against a
/// threshold to produce a [`Suggestion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleTargetType {
    CpuHotness,
    GcOverhead,
    LockContention,
    Reflection,
    FrequentAllocation,
}

/// A small record describing a pattern the advisor matches; cached by the
/// scheduler and snapshotted into every processor call within a polling
/// window (spec §9 "rule cache freshness vs. consistency").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionRule {
    pub target: String,
    pub target_type: RuleTargetType,
    pub threshold: f64,
    pub content_template: String,
}

/// The coarse bucket a task's advice is filed under on its aggregate
/// (master) task record (spec §4.5 step 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Cpu,
    App,
    Disk,
    Memory,
}

impl From<TaskType> for ResourceType {
    /// Pure mapping: generic/timing -> CPU, java* -> App, tracing -> Disk,
    /// mem-leak -> Memory, default -> CPU.
    fn from(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Generic | TaskType::Timing => ResourceType::Cpu,
            TaskType::JavaCpu | TaskType::JavaHeap => ResourceType::App,
            TaskType::Tracing => ResourceType::Disk,
            TaskType::MemLeak | TaskType::PprofMemory => ResourceType::Memory,
        }
    }
}

/// One task's advice, ready to be merged onto its aggregate (master) task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviceGroup {
    pub task_uuid: String,
    pub resource_type: ResourceType,
    pub suggestions: Vec<Suggestion>,
}

/// Derived completion state of an aggregate (master) task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Running,
    Completed,
}

/// The namespaced payload persisted for one task's result (spec §4.5 step 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub uploaded_artifacts: HashMap<String, String>,
    pub analyzer_payload: AnalyzerPayload,
    pub total_records: u64,
    pub active_threads: Vec<ActiveThreadEntry>,
    pub advice: Vec<Suggestion>,
}

/// One result record keyed by task UUID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_uuid: String,
    pub payload: ResultPayload,
    pub version: u32,
    /// Empty containers-info stub (spec §4.5 step 6); reserved for a future
    /// resource-usage breakdown this core does not populate.
    #[serde(default)]
    pub containers_info: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_derivation_matches_spec_mapping() {
        assert_eq!(ResourceType::from(TaskType::Generic), ResourceType::Cpu);
        assert_eq!(ResourceType::from(TaskType::Timing), ResourceType::Cpu);
        assert_eq!(ResourceType::from(TaskType::JavaCpu), ResourceType::App);
        assert_eq!(ResourceType::from(TaskType::JavaHeap), ResourceType::App);
        assert_eq!(ResourceType::from(TaskType::Tracing), ResourceType::Disk);
        assert_eq!(ResourceType::from(TaskType::MemLeak), ResourceType::Memory);
        assert_eq!(ResourceType::from(TaskType::PprofMemory), ResourceType::Memory);
    }
}
