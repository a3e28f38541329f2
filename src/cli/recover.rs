use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::Value;

#[derive(Args, Clone, Debug)]
pub struct RecoverArgs {
    /// Base URL of a running daemon
    #[arg(long, default_value = "http://127.0.0.1:8710")]
    pub endpoint: String,
}

/// Trigger a recovery episode on a running daemon. Clears a terminal
/// `CriticallyFailed` state first, so this is the operator escape hatch.
pub async fn cmd_recover(args: RecoverArgs) -> Result<()> {
    let base = args.endpoint.trim_end_matches('/');
    let response = reqwest::Client::new()
        .post(format!("{base}/api/recover"))
        .send()
        .await
        .context("daemon not reachable")?;

    let payload: Value = response.json().await?;
    if payload["recovered"].as_bool().unwrap_or(false) {
        println!("Master session recovered");
        Ok(())
    } else {
        bail!("recovery failed; inspect the daemon logs and the store backups");
    }
}
