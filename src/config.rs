use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use context_engine::{EngineConfig, SolverConfig};
use formpilot_context_pool::PoolConfig;
use formpilot_session_recovery::{PortalConfig, RecoveryConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Full application configuration, loaded from a YAML file with sane
/// defaults for every field. Credentials can be supplied through the
/// environment so the file never has to carry them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub portal: PortalConfig,
    pub engine: EngineConfig,
    pub recovery: RecoveryConfig,
    pub pool: PoolConfig,
    pub solver: SolverConfig,
    pub server: ServerConfig,
    pub stores: StoreConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address of the admin/status HTTP surface.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8710".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Named persistent profile store backing the master session.
    pub master_store: PathBuf,
    /// Directory holding the isolated per-clone store copies.
    pub clones_root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("formpilot");
        Self {
            master_store: base.join("master-profile"),
            clones_root: base.join("clones"),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path or the default location. A missing file is
    /// not an error; it just means defaults plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: AppConfig = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            info!(path = %path.display(), "loaded configuration");
            config
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            AppConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment beats file: `FORMPILOT_USERNAME`, `FORMPILOT_PASSWORD`
    /// and `FORMPILOT_SOLVER_URL`.
    fn apply_env_overrides(&mut self) {
        if let Ok(username) = env::var("FORMPILOT_USERNAME") {
            self.portal.credentials.username = username;
        }
        if let Ok(password) = env::var("FORMPILOT_PASSWORD") {
            self.portal.credentials.password = password;
        }
        if let Ok(endpoint) = env::var("FORMPILOT_SOLVER_URL") {
            self.solver.endpoint = endpoint;
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("failed to resolve the user config directory")?;
    path.push("formpilot");
    path.push("config.yaml");
    Ok(path)
}
