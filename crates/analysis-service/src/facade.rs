//! The concrete analyzer algorithms (flame-graph/call-graph construction,
//! heap-retainer analysis, leak detection) are external collaborators this
//! repository does not implement; [`UnconfiguredAnalyzerFacade`] is the seam
//! a real deployment plugs its analyzers into.

use analysis_core::processor::{Analyzer, AnalyzerFacade};
use analysis_core::task::{ProfilerType, TaskType};
use std::sync::Arc;

pub struct UnconfiguredAnalyzerFacade;

impl AnalyzerFacade for UnconfiguredAnalyzerFacade {
    fn create_analyzer(&self, task_type: TaskType, profiler_type: ProfilerType) -> anyhow::Result<Arc<dyn Analyzer>> {
        anyhow::bail!("no analyzer registered for task_type={task_type:?} profiler_type={profiler_type:?}")
    }
}
