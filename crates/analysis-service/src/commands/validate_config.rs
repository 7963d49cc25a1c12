//! `dashflow-analysis validate-config`: loads and validates configuration
//! without starting any source. Useful for CI and pre-deploy checks.

use analysis_core::config::ServiceConfig;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct ValidateConfigArgs {
    /// Path to a TOML configuration file. Falls back to
    /// `DASHFLOW_ANALYSIS_CONFIG` and compiled-in defaults when absent.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

pub async fn run(args: ValidateConfigArgs) -> anyhow::Result<()> {
    let config = ServiceConfig::load(args.config.as_deref())?;
    info!(
        sources = config.sources.len(),
        worker_count = config.scheduler.worker_count,
        "configuration is valid"
    );
    println!("configuration is valid: {} source(s) configured", config.sources.len());
    Ok(())
}
