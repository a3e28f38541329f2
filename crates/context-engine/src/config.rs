use std::path::PathBuf;
use std::time::Duration;

use formpilot_core_types::duration_str;
use serde::{Deserialize, Serialize};

/// Chromium launch settings shared by every context the engine creates.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit browser binary; falls back to `$PATH` discovery when unset.
    pub browser_binary: Option<PathBuf>,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Extra command line arguments appended to every launch.
    pub extra_args: Vec<String>,
    #[serde(with = "duration_str")]
    pub launch_timeout: Duration,
    /// Default navigation timeout when the caller does not pass one.
    #[serde(with = "duration_str")]
    pub nav_timeout: Duration,
    /// Hard ceiling for single element operations (find, click, type).
    #[serde(with = "duration_str")]
    pub op_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            browser_binary: None,
            headless: true,
            window_width: 1440,
            window_height: 900,
            extra_args: Vec::new(),
            launch_timeout: Duration::from_secs(30),
            nav_timeout: Duration::from_secs(20),
            op_timeout: Duration::from_secs(10),
        }
    }
}

const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

impl EngineConfig {
    /// Resolve the browser binary, preferring the configured path.
    pub fn resolve_binary(&self) -> Option<PathBuf> {
        if let Some(path) = &self.browser_binary {
            return Some(path.clone());
        }
        BROWSER_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_binary_wins() {
        let config = EngineConfig {
            browser_binary: Some(PathBuf::from("/opt/chrome")),
            ..EngineConfig::default()
        };
        assert_eq!(config.resolve_binary(), Some(PathBuf::from("/opt/chrome")));
    }

    #[test]
    fn defaults_deserialize_from_empty_map() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert!(config.headless);
        assert_eq!(config.nav_timeout, Duration::from_secs(20));
    }
}
