//! Test fakes for the analysis service's [`analysis_core::source::Source`]
//! trait and other seams, so crates exercising the scheduling core don't
//! need a live Postgres/Kafka/HTTP backend to write unit tests.

mod fake_analyzer;
mod fake_artifact_store;
mod fake_result_store;
mod fake_source;

pub use fake_analyzer::{FailingAnalyzerFacade, FakeAnalyzerFacade};
pub use fake_artifact_store::FakeArtifactStore;
pub use fake_result_store::FakeResultStore;
pub use fake_source::FakeSource;
