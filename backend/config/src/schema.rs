//! ModHost runtime configuration schema.
//!
//! Every field is optional on disk; [`crate::defaults`] fills the gaps and the
//! accessor methods below never fail.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use modhost_core::SharedName;

use crate::defaults::{
    DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_LOG_DIR, DEFAULT_LOG_LEVEL, DEFAULT_MODULES_DIR,
    DEFAULT_REGISTRATION_TIMEOUT_MS,
};

/// Root configuration (`config.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<SlotsConfig>,
}

/// How modules are fetched and how long they get to register.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderConfig {
    /// Bound on the wait for a module's `register()` call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_timeout_ms: Option<u64>,
    /// Bound on a single HTTP fetch of a remote entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_ms: Option<u64>,
    /// Root-relative entry URLs resolve against this origin when set...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// ...and against this directory otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules_dir: Option<PathBuf>,
    /// Broker entries that must be published before remote code runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_bindings: Option<Vec<SharedName>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    /// Installed-module catalog (JSON array of descriptors).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotsConfig {
    /// Slot names the host shell renders. Contributions to other names are
    /// legal but reported as a validation warning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known: Option<Vec<String>>,
}

impl RuntimeConfig {
    pub fn registration_timeout(&self) -> Duration {
        let ms = self
            .loader
            .as_ref()
            .and_then(|l| l.registration_timeout_ms)
            .unwrap_or(DEFAULT_REGISTRATION_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        let ms = self
            .loader
            .as_ref()
            .and_then(|l| l.fetch_timeout_ms)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn base_url(&self) -> Option<&str> {
        self.loader.as_ref().and_then(|l| l.base_url.as_deref())
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.loader
            .as_ref()
            .and_then(|l| l.modules_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODULES_DIR))
    }

    pub fn required_bindings(&self) -> Vec<SharedName> {
        self.loader
            .as_ref()
            .and_then(|l| l.required_bindings.clone())
            .unwrap_or_else(|| SharedName::ALL.to_vec())
    }

    pub fn catalog_path(&self) -> Option<PathBuf> {
        self.catalog.as_ref().and_then(|c| c.path.clone())
    }

    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.logging
            .as_ref()
            .and_then(|l| l.dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
    }

    pub fn known_slots(&self) -> Vec<String> {
        self.slots
            .as_ref()
            .and_then(|s| s.known.clone())
            .unwrap_or_else(|| modhost_core::slot_names::ALL.iter().map(|s| s.to_string()).collect())
    }
}
