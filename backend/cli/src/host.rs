//! Host start-up for CLI commands: publish the shared bindings, collect the
//! bundled modules and build a loader from the effective configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use modhost_config::defaults::DEFAULT_CATALOG_FILE;
use modhost_config::RuntimeConfig;
use modhost_core::{ModuleDescriptor, Session, SharedName};
use modhost_runtime::{
    init_registry, load_catalog, publish_session, publish_viewer, shared_bindings, DeclarativeExecutor, ExportMap,
    LibraryInfo, LoaderOptions, LocalModuleTable, ModuleLoader, ModuleRegistry, RenderNode, RoutingFetcher,
    ScriptExecutor, SessionHandle, SharedBindings, ViewerHandle, Widget, WidgetContext,
};

/// File name of a bundled module's registration document inside
/// `<modules_dir>/<id>/`.
const BUNDLED_ENTRY: &str = "module.json";

pub struct Host {
    pub registry: Arc<ModuleRegistry>,
    pub bindings: Arc<SharedBindings>,
    pub session: SessionHandle,
    pub viewer: ViewerHandle,
    pub loader: ModuleLoader,
}

impl Host {
    pub fn start(config: &RuntimeConfig) -> Result<Self> {
        let bindings = shared_bindings();
        let version = env!("CARGO_PKG_VERSION");
        for (name, library) in [
            (SharedName::UiRuntime, "modhost-ui"),
            (SharedName::Router, "modhost-router"),
            (SharedName::DesignKit, "modhost-design-kit"),
        ] {
            bindings.publish(name, Arc::new(LibraryInfo::new(library, version)))?;
        }
        let session = publish_session(&bindings, session_from_env())?;
        let viewer = publish_viewer(&bindings, Default::default())?;
        info!(auth = session.snapshot().has_token(), "Host bindings published");

        let registry = init_registry();
        let executor = Arc::new(DeclarativeExecutor::new(host_exports()));
        let local = bundled_modules(&config.modules_dir(), Arc::clone(&executor))?;
        let loader = ModuleLoader::new(
            Arc::clone(&registry),
            Arc::clone(&bindings),
            Arc::new(RoutingFetcher::from_config(config)),
            executor,
        )
        .with_local_modules(local)
        .with_options(LoaderOptions::from_config(config));

        Ok(Self { registry, bindings, session, viewer, loader })
    }
}

/// Session for the CLI run: anonymous unless `MODHOST_SESSION_TOKEN` is set.
fn session_from_env() -> Session {
    let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    Session {
        token: var("MODHOST_SESSION_TOKEN"),
        roles: var("MODHOST_SESSION_ROLES")
            .map(|roles| roles.split(',').map(|r| r.trim().to_string()).collect())
            .unwrap_or_default(),
        tenant_id: var("MODHOST_TENANT_ID"),
        user_id: var("MODHOST_USER_ID"),
    }
}

/// Resolve the catalog path from the flag, then config, then the default
/// file next to the modules directory.
pub fn catalog_path(config: &RuntimeConfig, flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| config.catalog_path())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_FILE))
}

pub async fn read_catalog(config: &RuntimeConfig, flag: Option<PathBuf>) -> Result<Vec<ModuleDescriptor>> {
    load_catalog(&catalog_path(config, flag)).await
}

/// Every `<modules_dir>/<id>/module.json` is a bundled module with that id.
/// Documents are read and evaluated on first load, not here.
fn bundled_modules(dir: &Path, executor: Arc<DeclarativeExecutor>) -> Result<LocalModuleTable> {
    let mut table = LocalModuleTable::new();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "No modules directory; no bundled modules");
        return Ok(table);
    }
    let entries = std::fs::read_dir(dir).with_context(|| format!("read modules dir {}", dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path().join(BUNDLED_ENTRY);
        if !path.is_file() {
            continue;
        }
        let Some(id) = entry.file_name().to_str().map(str::to_owned) else {
            warn!(path = %path.display(), "Skipping bundled module with a non UTF-8 name");
            continue;
        };
        let executor = Arc::clone(&executor);
        debug!(module = %id, "Found bundled module");
        table.insert(id, move || {
            let source = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            executor.evaluate(&path.display().to_string(), &source)
        });
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Host components
// ---------------------------------------------------------------------------

/// Toggle for one viewer layer. Renders the layer's current state and flips
/// it on any action.
struct LayerToggle {
    layer: String,
}

impl Widget for LayerToggle {
    fn render(&self, cx: &WidgetContext<'_>) -> RenderNode {
        let active = cx
            .host()
            .try_viewer()
            .map(|viewer| viewer.snapshot().active_layers.contains(&self.layer))
            .unwrap_or(false);
        RenderNode::element("LayerToggle").with_props(json!({ "layer": self.layer, "active": active }))
    }

    fn on_action(&self, cx: &WidgetContext<'_>, _action: &Value) {
        if let Ok(viewer) = cx.host().try_viewer() {
            viewer.toggle_layer(&self.layer);
        }
    }
}

/// Greets the signed-in user or asks them to log in.
struct SessionBadge;

impl Widget for SessionBadge {
    fn render(&self, cx: &WidgetContext<'_>) -> RenderNode {
        let auth = cx.host().auth();
        if !auth.is_authenticated() {
            return RenderNode::text("please log in");
        }
        RenderNode::element("SessionBadge").with_props(json!({ "tenant": auth.tenant_id() }))
    }
}

fn host_exports() -> ExportMap {
    let mut exports = ExportMap::new();
    exports.insert_factory("LayerToggle", |props: &Value| {
        let layer = props.get("layer").and_then(Value::as_str).unwrap_or_default();
        Arc::new(LayerToggle { layer: layer.to_string() }) as Arc<dyn Widget>
    });
    exports.insert("SessionBadge", Arc::new(SessionBadge));
    exports
}
