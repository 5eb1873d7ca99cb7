//! Config defaults: fills every unset field so the effective configuration
//! can be printed and validated as a whole.

use modhost_core::{slot_names, SharedName};

use crate::schema::{
    CatalogConfig, LoaderConfig, LoggingConfig, RuntimeConfig, SlotsConfig,
};

pub const DEFAULT_REGISTRATION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_MODULES_DIR: &str = "modules";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_CATALOG_FILE: &str = "catalog.json";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: RuntimeConfig) -> RuntimeConfig {
    let config = apply_loader_defaults(config);
    let config = apply_catalog_defaults(config);
    let config = apply_logging_defaults(config);
    apply_slot_defaults(config)
}

fn apply_loader_defaults(mut config: RuntimeConfig) -> RuntimeConfig {
    let loader = config.loader.get_or_insert_with(LoaderConfig::default);
    loader.registration_timeout_ms.get_or_insert(DEFAULT_REGISTRATION_TIMEOUT_MS);
    loader.fetch_timeout_ms.get_or_insert(DEFAULT_FETCH_TIMEOUT_MS);
    loader.modules_dir.get_or_insert_with(|| DEFAULT_MODULES_DIR.into());
    loader.required_bindings.get_or_insert_with(|| SharedName::ALL.to_vec());
    config
}

fn apply_catalog_defaults(mut config: RuntimeConfig) -> RuntimeConfig {
    let catalog = config.catalog.get_or_insert_with(CatalogConfig::default);
    catalog.path.get_or_insert_with(|| DEFAULT_CATALOG_FILE.into());
    config
}

fn apply_logging_defaults(mut config: RuntimeConfig) -> RuntimeConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    logging.level.get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
    logging.dir.get_or_insert_with(|| DEFAULT_LOG_DIR.into());
    config
}

fn apply_slot_defaults(mut config: RuntimeConfig) -> RuntimeConfig {
    let slots = config.slots.get_or_insert_with(SlotsConfig::default);
    slots
        .known
        .get_or_insert_with(|| slot_names::ALL.iter().map(|s| s.to_string()).collect());
    config
}
