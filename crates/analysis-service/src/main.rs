//! Service binary for the profiling analysis service (spec §9 "Process
//! lifecycle"): `run` serves the scheduler until SIGINT/SIGTERM,
//! `validate-config` checks configuration without starting any source, and
//! `healthcheck` probes a running instance.

mod commands;
mod facade;
mod shutdown;

use clap::{Parser, Subcommand};
use commands::{healthcheck, run, validate_config};
use std::process::ExitCode;
use tracing::error;

#[derive(Parser)]
#[command(name = "dashflow-analysis")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Profiling analysis service: ingestion, scheduling, and the processor pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service and serve until SIGINT/SIGTERM.
    Run(run::RunArgs),
    /// Load and validate configuration without starting any source.
    ValidateConfig(validate_config::ValidateConfigArgs),
    /// Check a running instance's health endpoint.
    Healthcheck(healthcheck::HealthcheckArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run::run(args).await,
        Commands::ValidateConfig(args) => validate_config::run(args).await,
        Commands::Healthcheck(args) => healthcheck::run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "dashflow-analysis exited with an error");
            ExitCode::FAILURE
        }
    }
}
