//! Executes one task end to end: stage, fetch, analyze, publish, persist,
//! advise, aggregate (spec §4.5). Each step is a contract point against one
//! of the traits below, so the pipeline itself never talks to a concrete
//! backend.

use crate::advisor::synthesize_advice;
use crate::analysis::{
    AdviceGroup, AggregateStatus, AnalysisRequest, AnalysisResponse, ResourceType, ResultPayload,
    Suggestion, SuggestionRule, TaskResult,
};
use crate::error::ProcessorError;
use crate::task::{ProfilerType, TaskEvent, TaskType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Blob storage for task input and output artifacts, keyed by slash-separated path.
/// Collaborator errors are opaque to the pipeline; the processor attaches the
/// step-identifying prefix when it maps them onto a [`ProcessorError`].
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload_file(&self, key: &str, local_path: &Path) -> anyhow::Result<()>;
    async fn download_file(&self, key: &str, local_path: &Path) -> anyhow::Result<()>;
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
    fn url(&self, key: &str) -> String;
}

/// Persistence for task results, advice, rule snapshots and aggregate state.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_result(&self, result: &TaskResult) -> anyhow::Result<()>;
    async fn save_suggestions(&self, task_uuid: &str, suggestions: &[Suggestion]) -> anyhow::Result<()>;
    async fn get_rules(&self) -> anyhow::Result<Vec<SuggestionRule>>;
    async fn update_suggestions(&self, aggregate_uuid: &str, group: AdviceGroup) -> anyhow::Result<()>;
    async fn check_and_complete_if_ready(&self, aggregate_uuid: &str) -> anyhow::Result<AggregateStatus>;
}

/// One concrete analyzer, resolved by the facade for a `(task_type, profiler_type)` pair.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, ctx: CancellationToken, request: &AnalysisRequest) -> anyhow::Result<AnalysisResponse>;
}

/// Resolves the analyzer for a task. The algorithms themselves are out of scope here;
/// this facade is the seam a real deployment plugs concrete analyzers into.
pub trait AnalyzerFacade: Send + Sync {
    fn create_analyzer(&self, task_type: TaskType, profiler_type: ProfilerType) -> anyhow::Result<Arc<dyn Analyzer>>;
}

const FLAME_GRAPH_ARTIFACT: &str = "flamegraph.json.gz";
const CALL_GRAPH_ARTIFACT: &str = "callgraph.json";
const HEAP_DETAIL_ARTIFACT: &str = "heapdetail.json";

/// Runs the nine-step pipeline described in spec §4.5 for one task.
pub struct TaskProcessor {
    artifact_store: Arc<dyn ArtifactStore>,
    result_store: Arc<dyn ResultStore>,
    analyzer_facade: Arc<dyn AnalyzerFacade>,
    data_dir: PathBuf,
}

impl TaskProcessor {
    #[must_use]
    pub fn new(
        artifact_store: Arc<dyn ArtifactStore>,
        result_store: Arc<dyn ResultStore>,
        analyzer_facade: Arc<dyn AnalyzerFacade>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            artifact_store,
            result_store,
            analyzer_facade,
            data_dir: data_dir.into(),
        }
    }

    /// Stages a fresh work directory for `event.task.uuid`, runs the pipeline,
    /// then removes the directory regardless of outcome (spec invariant 4).
    pub async fn process(
        &self,
        ctx: CancellationToken,
        event: &TaskEvent,
        rules: &[SuggestionRule],
    ) -> Result<()> {
        let work_dir = self.data_dir.join(&event.task.uuid);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| ProcessorError::Stage(e.to_string()))?;

        let outcome = self.run_pipeline(ctx, event, rules, &work_dir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            warn!(task_uuid = %event.task.uuid, error = %e, "failed to remove work directory");
        }

        outcome
    }

    async fn run_pipeline(
        &self,
        ctx: CancellationToken,
        event: &TaskEvent,
        rules: &[SuggestionRule],
        work_dir: &Path,
    ) -> Result<()> {
        let task = &event.task;

        let input_path = work_dir.join("input");
        self.artifact_store
            .download_file(&task.input_reference, &input_path)
            .await
            .map_err(|e| ProcessorError::Download(e.to_string()))?;

        let analyzer = self
            .analyzer_facade
            .create_analyzer(task.task_type, task.profiler_type)
            .map_err(|_| ProcessorError::AnalyzerNotFound {
                task_type: task.task_type,
                profiler_type: task.profiler_type,
            })?;

        let metadata = tokio::fs::metadata(&input_path)
            .await
            .map_err(|e| ProcessorError::Download(e.to_string()))?;
        if metadata.len() == 0 {
            return Err(ProcessorError::EmptyInput);
        }

        let request = AnalysisRequest {
            task_uuid: task.uuid.clone(),
            task_type: task.task_type,
            profiler_type: task.profiler_type,
            input_file: input_path,
            output_dir: work_dir.to_path_buf(),
            request_params: task.request_params.clone(),
        };
        let response = analyzer
            .analyze(ctx, &request)
            .await
            .map_err(|e| ProcessorError::Analysis(e.to_string()))?;

        let uploaded_artifacts = self.publish_artifacts(&task.uuid, &response).await;

        let advice = synthesize_advice(&response.payload, rules, &response.suggestions);

        let task_result = TaskResult {
            task_uuid: task.uuid.clone(),
            payload: ResultPayload {
                uploaded_artifacts,
                analyzer_payload: response.payload.clone(),
                total_records: response.total_records,
                active_threads: response.active_threads.clone(),
                advice: advice.clone(),
            },
            version: 1,
            containers_info: serde_json::Value::default(),
        };
        self.result_store
            .save_result(&task_result)
            .await
            .map_err(|e| ProcessorError::PersistResult(e.to_string()))?;

        if let Err(e) = self.result_store.save_suggestions(&task.uuid, &advice).await {
            warn!(task_uuid = %task.uuid, error = %e, "failed to persist advice; task still succeeds");
        }

        if let Some(parent_uuid) = &task.parent_uuid {
            self.aggregate_into_parent(parent_uuid, &task.uuid, task.task_type, advice)
                .await;
        }

        Ok(())
    }

    async fn publish_artifacts(&self, task_uuid: &str, response: &AnalysisResponse) -> HashMap<String, String> {
        let mut uploaded = HashMap::new();
        let named = [
            (FLAME_GRAPH_ARTIFACT, &response.flame_graph_file),
            (CALL_GRAPH_ARTIFACT, &response.call_graph_file),
            (HEAP_DETAIL_ARTIFACT, &response.heap_detail_file),
        ];
        for (artifact_name, local_path) in named {
            let Some(local_path) = local_path else { continue };
            self.publish_one(task_uuid, artifact_name, local_path, &mut uploaded).await;
        }
        for (name, local_path) in &response.output_files {
            self.publish_one(task_uuid, name, local_path, &mut uploaded).await;
        }
        uploaded
    }

    async fn publish_one(
        &self,
        task_uuid: &str,
        artifact_name: &str,
        local_path: &str,
        uploaded: &mut HashMap<String, String>,
    ) {
        let key = format!("{task_uuid}/{artifact_name}");
        match self.artifact_store.upload_file(&key, Path::new(local_path)).await {
            Ok(()) => {
                uploaded.insert(artifact_name.to_string(), key);
            }
            Err(e) => warn!(task_uuid, artifact_name, error = %e, "artifact upload failed; task still succeeds"),
        }
    }

    async fn aggregate_into_parent(
        &self,
        parent_uuid: &str,
        task_uuid: &str,
        task_type: TaskType,
        advice: Vec<Suggestion>,
    ) {
        let group = AdviceGroup {
            task_uuid: task_uuid.to_string(),
            resource_type: ResourceType::from(task_type),
            suggestions: advice,
        };
        if let Err(e) = self.result_store.update_suggestions(parent_uuid, group).await {
            warn!(parent_uuid, error = %e, "failed to update aggregate advice; task still succeeds");
            return;
        }
        match self.result_store.check_and_complete_if_ready(parent_uuid).await {
            Ok(status) => debug!(parent_uuid, ?status, "aggregate status recomputed"),
            Err(e) => warn!(parent_uuid, error = %e, "failed to recompute aggregate status; task still succeeds"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_testing::{FakeAnalyzerFacade, FakeArtifactStore, FakeResultStore};
    use crate::task::{AckToken, Priority, RequestParams, Task};
    use std::time::SystemTime;

    fn event(uuid: &str, parent_uuid: Option<&str>) -> TaskEvent {
        TaskEvent {
            event_id: uuid.to_string(),
            task: Task {
                id: 1,
                uuid: uuid.to_string(),
                task_type: TaskType::JavaCpu,
                profiler_type: ProfilerType::Perf,
                input_reference: format!("raw/{uuid}.collapsed"),
                parent_uuid: parent_uuid.map(str::to_string),
                request_params: RequestParams::default(),
                created_at: SystemTime::now(),
                updated_at: SystemTime::now(),
            },
            source_type: "database".to_string(),
            source_name: "primary".to_string(),
            priority: Priority::NORMAL,
            metadata: HashMap::new(),
            ack_token: AckToken::RowId(1),
        }
    }

    #[tokio::test]
    async fn happy_path_persists_result_and_cleans_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(FakeArtifactStore::new());
        artifacts.seed_input("raw/U1.collapsed", b"stack traces here");
        let results = Arc::new(FakeResultStore::new());
        let facade = Arc::new(FakeAnalyzerFacade::with_default_response());

        let processor = TaskProcessor::new(artifacts.clone(), results.clone(), facade, dir.path());
        let event = event("U1", None);

        processor.process(CancellationToken::new(), &event, &[]).await.unwrap();

        assert!(results.result_for("U1").is_some());
        assert!(!dir.path().join("U1").exists());
    }

    #[tokio::test]
    async fn empty_input_is_fatal_and_skips_result_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(FakeArtifactStore::new());
        artifacts.seed_input("raw/U1.collapsed", b"");
        let results = Arc::new(FakeResultStore::new());
        let facade = Arc::new(FakeAnalyzerFacade::with_default_response());

        let processor = TaskProcessor::new(artifacts, results.clone(), facade, dir.path());
        let event = event("U1", None);

        let err = processor.process(CancellationToken::new(), &event, &[]).await.unwrap_err();
        assert!(matches!(err, ProcessorError::EmptyInput));
        assert!(results.result_for("U1").is_none());
        assert!(!dir.path().join("U1").exists());
    }

    #[tokio::test]
    async fn download_failure_is_fatal_and_work_dir_is_still_removed() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(FakeArtifactStore::new());
        let results = Arc::new(FakeResultStore::new());
        let facade = Arc::new(FakeAnalyzerFacade::with_default_response());

        let processor = TaskProcessor::new(artifacts, results, facade, dir.path());
        let event = event("U1", None);

        let err = processor.process(CancellationToken::new(), &event, &[]).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Download(_)));
        assert!(err.to_string().contains("failed to download result file"));
        assert!(!dir.path().join("U1").exists());
    }

    #[tokio::test]
    async fn sub_task_updates_parent_aggregate_advice() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(FakeArtifactStore::new());
        artifacts.seed_input("raw/U2a.collapsed", b"stack traces here");
        let results = Arc::new(FakeResultStore::new());
        results.register_aggregate("M2", &["U2a", "U2b"]);
        let facade = Arc::new(FakeAnalyzerFacade::with_default_response());

        let processor = TaskProcessor::new(artifacts, results.clone(), facade, dir.path());
        let event = event("U2a", Some("M2"));

        processor.process(CancellationToken::new(), &event, &[]).await.unwrap();

        let groups = results.aggregate_groups("M2");
        assert_eq!(groups.len(), 1);
        assert_eq!(results.aggregate_status("M2"), Some(AggregateStatus::Running));
    }

    #[tokio::test]
    async fn artifact_upload_failure_does_not_fail_task() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(FakeArtifactStore::new());
        artifacts.seed_input("raw/U1.collapsed", b"stack traces here");
        artifacts.fail_uploads();
        let results = Arc::new(FakeResultStore::new());
        let facade = Arc::new(FakeAnalyzerFacade::with_default_response());

        let processor = TaskProcessor::new(artifacts, results.clone(), facade, dir.path());
        let event = event("U1", None);

        processor.process(CancellationToken::new(), &event, &[]).await.unwrap();
        let result = results.result_for("U1").unwrap();
        assert!(result.payload.uploaded_artifacts.is_empty());
    }
}
