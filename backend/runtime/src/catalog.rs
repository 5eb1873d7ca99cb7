//! Installed-module catalog: the ordered descriptor list a tenant's
//! provisioning service hands to the host once per session.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use modhost_core::{ModHostError, ModuleDescriptor};

/// Parse a catalog document (a JSON array of descriptors).
///
/// Entries with a blank id are skipped, and a repeated id keeps its first
/// occurrence. A remote entry without `entryUrl` is kept: it surfaces as an
/// unresolvable module at load time, where the host can show it as
/// unavailable.
pub fn parse_catalog(raw: &str) -> Result<Vec<ModuleDescriptor>, ModHostError> {
    let entries: Vec<ModuleDescriptor> = serde_json::from_str(raw)
        .map_err(|e| ModHostError::Catalog(format!("invalid catalog JSON: {e}")))?;

    let mut seen = HashSet::new();
    let mut catalog = Vec::with_capacity(entries.len());
    for (index, mut descriptor) in entries.into_iter().enumerate() {
        descriptor.id = descriptor.id.trim().to_string();
        if descriptor.id.is_empty() {
            warn!(index, "[Catalog] Skipping entry without an id");
            continue;
        }
        if !seen.insert(descriptor.id.clone()) {
            warn!(module = %descriptor.id, index, "[Catalog] Duplicate module id; keeping the first entry");
            continue;
        }
        if !descriptor.is_local && descriptor.remote_url().is_none() {
            warn!(module = %descriptor.id, "[Catalog] Remote module has no entryUrl");
        }
        catalog.push(descriptor);
    }
    Ok(catalog)
}

/// Read and parse a catalog file.
pub async fn load_catalog(path: &Path) -> Result<Vec<ModuleDescriptor>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read catalog at {}", path.display()))?;
    let catalog = parse_catalog(&raw).with_context(|| format!("parse catalog at {}", path.display()))?;
    info!(path = %path.display(), modules = catalog.len(), "[Catalog] Loaded");
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_catalog_order() {
        let raw = r#"[
            {"id": "weather", "isLocal": true},
            {"id": "lidar", "isLocal": false, "entryUrl": "/modules/lidar/module.js", "version": "0.4.1"}
        ]"#;
        let catalog = parse_catalog(raw).unwrap();
        let ids: Vec<_> = catalog.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["weather", "lidar"]);
        assert_eq!(catalog[1].version.as_deref(), Some("0.4.1"));
    }

    #[test]
    fn skips_blank_and_duplicate_ids() {
        let raw = r#"[
            {"id": " ", "isLocal": true},
            {"id": "risk", "isLocal": true},
            {"id": "risk", "isLocal": false, "entryUrl": "/modules/risk.js"},
            {"id": "robots", "isLocal": false}
        ]"#;
        let catalog = parse_catalog(raw).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog[0].is_local);
        assert_eq!(catalog[1].id, "robots");
        assert!(catalog[1].remote_url().is_none());
    }

    #[test]
    fn rejects_non_array_documents() {
        let err = parse_catalog(r#"{"id": "weather"}"#).unwrap_err();
        assert!(matches!(err, ModHostError::Catalog(_)));
    }

    #[tokio::test]
    async fn load_catalog_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("catalog.json");
        let err = load_catalog(&missing).await.unwrap_err();
        assert!(format!("{err:#}").contains("catalog.json"));
    }
}
