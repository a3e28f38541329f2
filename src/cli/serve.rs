use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::config::AppConfig;
use crate::service::SessionService;

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Override the bind address from the config file
    #[arg(long)]
    pub bind: Option<String>,
}

/// Run the daemon: authenticate the master session, warm the pool, start
/// the background guardians and serve the admin surface until Ctrl+C.
pub async fn cmd_serve(args: ServeArgs, config: AppConfig) -> Result<()> {
    crate::metrics::register_metrics();
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());

    let service = SessionService::build(&config)?;
    service.start().await;
    info!(portal = %config.portal.landing_url, "session service serving jobs");

    crate::server::serve(service, &bind).await
}
