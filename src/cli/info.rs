use anyhow::Result;

use crate::config::{default_config_path, AppConfig};

/// Print build metadata and the effective environment.
pub fn cmd_info(config: &AppConfig) -> Result<()> {
    println!("FormPilot v{}", env!("CARGO_PKG_VERSION"));
    println!("Build date: {}", env!("BUILD_DATE"));
    println!("Git commit: {}", env!("GIT_HASH"));
    println!();
    if let Ok(path) = default_config_path() {
        println!("Config path: {}", path.display());
    }
    println!("Portal: {}", config.portal.landing_url);
    println!("Master store: {}", config.stores.master_store.display());
    println!("Clones root: {}", config.stores.clones_root.display());
    match config.engine.resolve_binary() {
        Some(path) => println!("Browser: {}", path.display()),
        None => println!("Browser: NOT FOUND (install Chromium or set engine.browser_binary)"),
    }
    Ok(())
}
