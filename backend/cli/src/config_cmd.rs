//! `modhost config`: print the effective configuration as YAML.

use anyhow::{Context, Result};

use modhost_config::RuntimeConfig;

pub fn run(config: &RuntimeConfig) -> Result<()> {
    print!("{}", render(config)?);
    Ok(())
}

fn render(config: &RuntimeConfig) -> Result<String> {
    serde_yaml::to_string(config).context("Failed to serialize effective config")
}
