//! Declarative remote modules.
//!
//! A remote entry is a JSON registration document rather than executable
//! code. "Executing" it produces a [`ModuleEntry`] whose activation
//! registers the document's contributions through the [`ModuleHost`] it is
//! given. Component names are resolved through an [`ExportMap`]; names the
//! host does not export render as generic declared elements.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::debug;

use modhost_core::Visibility;

use crate::sdk::{
    ContextProvider, ModuleEntry, ModuleHost, RegistrationRequest, RenderNode, Widget,
    WidgetContext, WidgetDeclaration,
};

/// Turns fetched bytes into a module entry.
pub trait ScriptExecutor: Send + Sync {
    fn evaluate(&self, url: &str, source: &[u8]) -> Result<Arc<dyn ModuleEntry>>;
}

// ---------------------------------------------------------------------------
// Document format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDocument {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub context_provider: Option<ProviderDocument>,
    #[serde(default)]
    pub viewer_slots: IndexMap<String, Vec<WidgetDocument>>,
}

/// A field of the wrong type reads as absent instead of rejecting the
/// whole document.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDocument {
    pub name: String,
    #[serde(default)]
    pub initial_state: Map<String, Value>,
}

/// Every field is optional and lenient here; the slot engine decides what is
/// malformed. An entry that is not an object at all reads as an empty one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Value")]
pub struct WidgetDocument {
    pub id: Option<String>,
    pub priority: Option<i32>,
    pub component: Option<String>,
    pub props: Value,
    pub visibility: Option<VisibilityDocument>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WidgetFields {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    priority: Option<i32>,
    #[serde(default, deserialize_with = "lenient")]
    component: Option<String>,
    #[serde(default)]
    props: Value,
    #[serde(default, deserialize_with = "lenient")]
    visibility: Option<VisibilityDocument>,
}

impl From<Value> for WidgetDocument {
    fn from(value: Value) -> Self {
        match serde_json::from_value::<WidgetFields>(value) {
            Ok(fields) => WidgetDocument {
                id: fields.id,
                priority: fields.priority,
                component: fields.component,
                props: fields.props,
                visibility: fields.visibility,
            },
            Err(_) => WidgetDocument::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityDocument {
    pub entity_types: Option<BTreeSet<String>>,
    pub active_layers: Option<BTreeSet<String>>,
}

impl From<VisibilityDocument> for Visibility {
    fn from(doc: VisibilityDocument) -> Self {
        Visibility { entity_types: doc.entity_types, active_layers: doc.active_layers }
    }
}

// ---------------------------------------------------------------------------
// Export map
// ---------------------------------------------------------------------------

type ComponentFactory = Arc<dyn Fn(&Value) -> Arc<dyn Widget> + Send + Sync>;

/// Components the host exposes to declarative modules, keyed by export name.
/// A `module/Component` key shadows a plain `Component` key for that module.
#[derive(Clone, Default)]
pub struct ExportMap {
    exports: HashMap<String, ComponentFactory>,
}

impl ExportMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export a fixed widget; declared props are ignored.
    pub fn insert(&mut self, name: impl Into<String>, widget: Arc<dyn Widget>) {
        self.exports.insert(name.into(), Arc::new(move |_: &Value| Arc::clone(&widget)));
    }

    /// Export a component built from each declaration's props.
    pub fn insert_factory<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Arc<dyn Widget> + Send + Sync + 'static,
    {
        self.exports.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.exports.contains_key(name)
    }

    pub fn resolve(&self, module_id: &str, component: &str, props: &Value) -> Option<Arc<dyn Widget>> {
        self.exports
            .get(&format!("{module_id}/{component}"))
            .or_else(|| self.exports.get(component))
            .map(|factory| factory(props))
    }
}

// ---------------------------------------------------------------------------
// Declared widgets and providers
// ---------------------------------------------------------------------------

/// Fallback rendering for a component the host does not export: an element
/// named after the component, carrying its props and the module's provider
/// state.
pub struct DeclaredWidget {
    component: String,
    props: Value,
}

impl DeclaredWidget {
    pub fn new(component: impl Into<String>, props: Value) -> Self {
        Self { component: component.into(), props }
    }
}

impl Widget for DeclaredWidget {
    fn render(&self, cx: &WidgetContext<'_>) -> RenderNode {
        let mut props = match &self.props {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => Map::from_iter([("value".to_string(), other.clone())]),
        };
        if let Some(state) = cx.provider() {
            props.insert("state".into(), Value::Object(state.snapshot()));
        }
        RenderNode::element(&self.component).with_props(Value::Object(props))
    }

    /// `{"set": {key: value, ..}}` writes into the module's provider state.
    fn on_action(&self, cx: &WidgetContext<'_>, action: &Value) {
        let (Some(state), Some(Value::Object(updates))) = (cx.provider(), action.get("set")) else {
            return;
        };
        for (key, value) in updates {
            state.set(key.clone(), value.clone());
        }
    }
}

pub struct DeclaredProvider {
    name: String,
    initial_state: Map<String, Value>,
}

impl ContextProvider for DeclaredProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn initial_state(&self) -> Map<String, Value> {
        self.initial_state.clone()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Entry produced from a [`ModuleDocument`]. Activation registers it.
pub struct DeclarativeEntry {
    request: RegistrationRequest,
}

#[async_trait]
impl ModuleEntry for DeclarativeEntry {
    async fn activate(&self, host: ModuleHost) -> Result<()> {
        host.register(self.request.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct DeclarativeExecutor {
    exports: ExportMap,
}

impl DeclarativeExecutor {
    pub fn new(exports: ExportMap) -> Self {
        Self { exports }
    }

    pub fn build_request(&self, doc: ModuleDocument) -> RegistrationRequest {
        let mut request = RegistrationRequest::new(&doc.id);
        request.version = doc.version;
        request.context_provider = doc.context_provider.map(|p| {
            Arc::new(DeclaredProvider { name: p.name, initial_state: p.initial_state })
                as Arc<dyn ContextProvider>
        });
        for (slot, widgets) in doc.viewer_slots {
            let declarations = widgets
                .into_iter()
                .map(|w| WidgetDeclaration {
                    component: w.component.map(|name| {
                        self.exports.resolve(&doc.id, &name, &w.props).unwrap_or_else(|| {
                            Arc::new(DeclaredWidget::new(name, w.props.clone())) as Arc<dyn Widget>
                        })
                    }),
                    id: w.id,
                    priority: w.priority,
                    visibility: w.visibility.map(Into::into),
                })
                .collect();
            request.viewer_slots.insert(slot, declarations);
        }
        request
    }
}

impl ScriptExecutor for DeclarativeExecutor {
    fn evaluate(&self, url: &str, source: &[u8]) -> Result<Arc<dyn ModuleEntry>> {
        let doc: ModuleDocument = serde_json::from_slice(source)
            .with_context(|| format!("module document at {url} is not valid JSON"))?;
        debug!(module = %doc.id, url = %url, slots = doc.viewer_slots.len(), "Evaluated module document");
        Ok(Arc::new(DeclarativeEntry { request: self.build_request(doc) }))
    }
}
