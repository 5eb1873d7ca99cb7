//! Config file location and loading.

use crate::schema::RuntimeConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Resolve the config directory.
/// Priority: `MODHOST_CONFIG_DIR` env > `~/.modhost/` > `./.modhost`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MODHOST_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|home| home.join(".modhost"))
        .unwrap_or_else(|| PathBuf::from(".modhost"))
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Read and parse the YAML file. A missing file yields an empty config.
pub async fn load_config(path: &Path) -> Result<RuntimeConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(RuntimeConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file is a valid, empty config.
    if raw.trim().is_empty() {
        return Ok(RuntimeConfig::default());
    }

    let config: RuntimeConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}
