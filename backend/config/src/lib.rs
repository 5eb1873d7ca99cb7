//! `modhost-config`: runtime configuration for the ModHost module runtime.
//!
//! Provides:
//! - Typed config schema (loader timeouts, module origins, logging, slots)
//! - YAML loading with `${ENV_VAR}` substitution
//! - Default value application
//! - Validation report with field paths

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{collect_referenced_vars, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config};
pub use schema::{CatalogConfig, LoaderConfig, LoggingConfig, RuntimeConfig, SlotsConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{Context, Result};
use modhost_core::ModHostError;
use serde_json::Value;
use std::path::Path;

/// Load, substitute env vars, apply defaults and validate a config file.
///
/// Warnings are logged; validation errors fail the load.
pub async fn load_and_prepare(path: &Path) -> Result<RuntimeConfig> {
    let raw_config = load_config(path).await?;

    let value: Value = serde_json::to_value(&raw_config)
        .context("Failed to serialize config for processing")?;
    let value = resolve_env_vars(&value).context("Failed to resolve env vars in config")?;
    let config: RuntimeConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;

    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if let Some(first) = report.errors.first() {
        return Err(ModHostError::Config(first.to_string()).into());
    }

    Ok(config)
}
