//! A fake [`ResultStore`] holding results, advice and aggregate state in memory.

use analysis_core::analysis::{AdviceGroup, AggregateStatus, Suggestion, SuggestionRule, TaskResult};
use analysis_core::processor::ResultStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct AggregateState {
    sub_tasks: Vec<String>,
    completed: HashSet<String>,
    groups: Vec<AdviceGroup>,
    status: AggregateStatus,
}

impl Default for AggregateState {
    fn default() -> Self {
        Self {
            sub_tasks: Vec::new(),
            completed: HashSet::new(),
            groups: Vec::new(),
            status: AggregateStatus::Running,
        }
    }
}

#[derive(Default)]
pub struct FakeResultStore {
    results: Mutex<HashMap<String, TaskResult>>,
    suggestions: Mutex<HashMap<String, Vec<Suggestion>>>,
    rules: Mutex<Vec<SuggestionRule>>,
    aggregates: Mutex<HashMap<String, AggregateState>>,
}

impl FakeResultStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn result_for(&self, task_uuid: &str) -> Option<TaskResult> {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).get(task_uuid).cloned()
    }

    #[must_use]
    pub fn suggestions_for(&self, task_uuid: &str) -> Option<Vec<Suggestion>> {
        self.suggestions.lock().unwrap_or_else(|e| e.into_inner()).get(task_uuid).cloned()
    }

    pub fn set_rules(&self, rules: Vec<SuggestionRule>) {
        *self.rules.lock().unwrap_or_else(|e| e.into_inner()) = rules;
    }

    /// Declares `aggregate_uuid`'s sub-task set, so `check_and_complete_if_ready`
    /// knows when every sub-task has reported in.
    pub fn register_aggregate(&self, aggregate_uuid: &str, sub_task_uuids: &[&str]) {
        let mut aggregates = self.aggregates.lock().unwrap_or_else(|e| e.into_inner());
        let state = aggregates.entry(aggregate_uuid.to_string()).or_default();
        state.sub_tasks = sub_task_uuids.iter().map(|s| (*s).to_string()).collect();
    }

    #[must_use]
    pub fn aggregate_groups(&self, aggregate_uuid: &str) -> Vec<AdviceGroup> {
        self.aggregates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(aggregate_uuid)
            .map(|state| state.groups.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn aggregate_status(&self, aggregate_uuid: &str) -> Option<AggregateStatus> {
        self.aggregates.lock().unwrap_or_else(|e| e.into_inner()).get(aggregate_uuid).map(|state| state.status)
    }
}

#[async_trait]
impl ResultStore for FakeResultStore {
    async fn save_result(&self, result: &TaskResult) -> anyhow::Result<()> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(result.task_uuid.clone(), result.clone());
        Ok(())
    }

    async fn save_suggestions(&self, task_uuid: &str, suggestions: &[Suggestion]) -> anyhow::Result<()> {
        self.suggestions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_uuid.to_string(), suggestions.to_vec());
        Ok(())
    }

    async fn get_rules(&self) -> anyhow::Result<Vec<SuggestionRule>> {
        Ok(self.rules.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn update_suggestions(&self, aggregate_uuid: &str, group: AdviceGroup) -> anyhow::Result<()> {
        let mut aggregates = self.aggregates.lock().unwrap_or_else(|e| e.into_inner());
        let state = aggregates.entry(aggregate_uuid.to_string()).or_default();
        state.completed.insert(group.task_uuid.clone());
        state.groups.push(group);
        Ok(())
    }

    async fn check_and_complete_if_ready(&self, aggregate_uuid: &str) -> anyhow::Result<AggregateStatus> {
        let mut aggregates = self.aggregates.lock().unwrap_or_else(|e| e.into_inner());
        let state = aggregates.entry(aggregate_uuid.to_string()).or_default();
        state.status = if !state.sub_tasks.is_empty() && state.completed.len() >= state.sub_tasks.len() {
            AggregateStatus::Completed
        } else {
            AggregateStatus::Running
        };
        Ok(state.status)
    }
}
