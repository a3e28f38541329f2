use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

#[derive(Args, Clone, Debug)]
pub struct StatusArgs {
    /// Base URL of a running daemon
    #[arg(long, default_value = "http://127.0.0.1:8710")]
    pub endpoint: String,

    /// Print the raw JSON payload instead of a summary
    #[arg(long)]
    pub json: bool,

    /// Include the recent recovery event log
    #[arg(long)]
    pub events: bool,
}

pub async fn cmd_status(args: StatusArgs) -> Result<()> {
    let base = args.endpoint.trim_end_matches('/');
    let client = reqwest::Client::new();
    let status: Value = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .context("daemon not reachable")?
        .error_for_status()?
        .json()
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_summary(&status);
    }

    if args.events {
        let events: Value = client
            .get(format!("{base}/api/events"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        println!("\nRecent events:");
        println!("{}", serde_json::to_string_pretty(&events)?);
    }
    Ok(())
}

fn print_summary(status: &Value) {
    let keeper = &status["keeper"];
    let pool = &status["pool"];
    println!(
        "Keeper state: {}",
        keeper["state"].as_str().unwrap_or("unknown")
    );
    println!(
        "Master active: {}  epoch: {}",
        keeper["master_active"], keeper["epoch"]
    );
    println!(
        "Last verified: {}",
        keeper["last_verified_at"].as_str().unwrap_or("never")
    );
    println!(
        "Session since: {}",
        keeper["created_at"].as_str().unwrap_or("never")
    );
    println!(
        "Pool: {} ready / {} active",
        pool["ready"], pool["active"]
    );
    if let Some(history) = keeper["history"].as_array() {
        println!("Recovery attempts on record: {}", history.len());
        if let Some(last) = history.last() {
            println!(
                "Last attempt: {} {} ({})",
                last["level"].as_str().unwrap_or("?"),
                if last["success"].as_bool().unwrap_or(false) {
                    "succeeded"
                } else {
                    "failed"
                },
                last["reason"].as_str().unwrap_or("")
            );
        }
    }
}
