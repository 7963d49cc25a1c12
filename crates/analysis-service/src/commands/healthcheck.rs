//! `dashflow-analysis healthcheck`: calls a running instance's `/healthz`
//! endpoint — a thin client over the aggregator's own `health_check`, which
//! the running process already folds into that endpoint.

use clap::Args;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct HealthcheckArgs {
    /// Address of a running instance's metrics server, e.g. `127.0.0.1:9090`.
    #[arg(long, short, default_value = "127.0.0.1:9090")]
    pub addr: String,
}

pub async fn run(args: HealthcheckArgs) -> anyhow::Result<()> {
    let url = format!("http://{}/healthz", args.addr);
    let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;
    let response = client.get(&url).send().await?;

    if response.status().is_success() {
        println!("ok");
        Ok(())
    } else {
        anyhow::bail!("healthcheck failed: {} returned {}", url, response.status())
    }
}
