//! `modhost slot`: load a catalog, then render one slot against a viewer
//! state built from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use modhost_config::RuntimeConfig;
use modhost_core::EntityRef;
use modhost_runtime::{HostContext, SlotMount};

use crate::host::{read_catalog, Host};

pub async fn run(
    config: &RuntimeConfig,
    catalog: Option<PathBuf>,
    slot: &str,
    entity_type: Option<String>,
    layers: Vec<String>,
) -> Result<()> {
    if !config.known_slots().iter().any(|known| known == slot) {
        warn!(slot = %slot, "Slot is not one the host shell renders");
    }

    let catalog = read_catalog(config, catalog).await?;
    let host = Host::start(config)?;
    let report = host.loader.load_all(&catalog).await;
    for failure in &report.failures {
        warn!(module = %failure.module_id(), "Not contributing: {failure}");
    }

    if let Some(entity_type) = entity_type {
        host.viewer.select_entity(EntityRef::new("cli-selection", entity_type));
    }
    for layer in &layers {
        host.viewer.set_layer_active(layer, true);
    }

    let mut mount = SlotMount::mount(slot, Arc::clone(&host.registry), HostContext::new(Arc::clone(&host.bindings)));
    let render = mount.render();
    println!("{}", serde_json::to_string_pretty(&render)?);
    Ok(())
}
