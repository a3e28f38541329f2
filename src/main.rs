use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use formpilot_cli::cli::{
    info::cmd_info,
    recover::{cmd_recover, RecoverArgs},
    serve::{cmd_serve, ServeArgs},
    status::{cmd_status, StatusArgs},
};
use formpilot_cli::config::AppConfig;
use formpilot_cli::telemetry;

/// FormPilot - insurance form submission with a self-healing portal session
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session daemon and admin HTTP surface
    Serve(ServeArgs),

    /// Query a running daemon for session and pool status
    Status(StatusArgs),

    /// Force a recovery episode on a running daemon
    Recover(RecoverArgs),

    /// Show build metadata and the effective environment
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_logging(&cli.log_level, cli.debug, cli.json_logs)?;

    let config = AppConfig::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Serve(args) => cmd_serve(args, config).await,
        Commands::Status(args) => cmd_status(args).await,
        Commands::Recover(args) => cmd_recover(args).await,
        Commands::Info => cmd_info(&config),
    };

    if let Err(err) = result {
        error!("command failed: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}
