//! A fake [`AnalyzerFacade`]/[`Analyzer`] pair returning a configured response.

use analysis_core::analysis::{
    ActiveThreadEntry, AnalysisRequest, AnalysisResponse, AnalyzerPayload, Suggestion, TopFunctionEntry,
};
use analysis_core::processor::{Analyzer, AnalyzerFacade};
use analysis_core::task::{ProfilerType, TaskType};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct FakeAnalyzerFacade {
    response: AnalysisResponse,
}

impl FakeAnalyzerFacade {
    #[must_use]
    pub fn new(response: AnalysisResponse) -> Self {
        Self { response }
    }

    /// A facade returning the S1-scenario response: one hot function, a flame
    /// graph and call graph present, ten total records.
    #[must_use]
    pub fn with_default_response() -> Self {
        Self::new(AnalysisResponse {
            task_uuid: String::new(),
            flame_graph_file: Some("flame.json.gz".to_string()),
            call_graph_file: Some("call.json".to_string()),
            heap_detail_file: None,
            payload: AnalyzerPayload::Cpu {
                top_functions: vec![TopFunctionEntry {
                    name: "foo".to_string(),
                    self_percent: 80.0,
                    tags: vec![],
                }],
            },
            total_records: 10,
            active_threads: vec![ActiveThreadEntry {
                name: "main".to_string(),
                state: "runnable".to_string(),
            }],
            suggestions: vec![Suggestion {
                text: "hotspot foo".to_string(),
                rule_target: None,
            }],
            output_files: Default::default(),
        })
    }
}

impl AnalyzerFacade for FakeAnalyzerFacade {
    fn create_analyzer(&self, _task_type: TaskType, _profiler_type: ProfilerType) -> anyhow::Result<Arc<dyn Analyzer>> {
        Ok(Arc::new(FakeAnalyzer {
            response: self.response.clone(),
        }))
    }
}

/// A facade that always fails resolution, for exercising the "analyzer not found" path.
pub struct FailingAnalyzerFacade;

impl AnalyzerFacade for FailingAnalyzerFacade {
    fn create_analyzer(&self, _task_type: TaskType, _profiler_type: ProfilerType) -> anyhow::Result<Arc<dyn Analyzer>> {
        anyhow::bail!("no analyzer registered in this fake")
    }
}

struct FakeAnalyzer {
    response: AnalysisResponse,
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(&self, _ctx: CancellationToken, request: &AnalysisRequest) -> anyhow::Result<AnalysisResponse> {
        let mut response = self.response.clone();
        response.task_uuid = request.task_uuid.clone();
        Ok(response)
    }
}
