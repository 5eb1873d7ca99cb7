//! Module SDK
//!
//! The boundary between the runtime and module code: what a module hands to
//! `register()`, what a widget renders to, and the capability object a
//! module entry receives when it is activated.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use modhost_core::Visibility;

use crate::bridge::HostContext;
use crate::broker::SharedBindings;
use crate::registry::{ModuleRegistry, RegisteredModule};

// ---------------------------------------------------------------------------
// Render tree
// ---------------------------------------------------------------------------

/// Host-agnostic output of a widget. The embedding UI maps it onto real
/// components.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderNode {
    Empty,
    Text {
        text: String,
    },
    Element {
        name: String,
        #[serde(skip_serializing_if = "Value::is_null")]
        props: Value,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        children: Vec<RenderNode>,
    },
}

impl RenderNode {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn element(name: impl Into<String>) -> Self {
        Self::Element { name: name.into(), props: Value::Null, children: Vec::new() }
    }

    pub fn with_props(mut self, value: Value) -> Self {
        if let Self::Element { props, .. } = &mut self {
            *props = value;
        }
        self
    }

    pub fn with_child(mut self, child: RenderNode) -> Self {
        if let Self::Element { children, .. } = &mut self {
            children.push(child);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Widgets and providers
// ---------------------------------------------------------------------------

/// Everything a widget may touch while rendering or handling an action.
pub struct WidgetContext<'a> {
    pub module_id: &'a str,
    pub slot: &'a str,
    pub widget_id: &'a str,
    provider: Option<&'a ProviderState>,
    host: &'a HostContext,
}

impl<'a> WidgetContext<'a> {
    pub fn new(
        module_id: &'a str,
        slot: &'a str,
        widget_id: &'a str,
        provider: Option<&'a ProviderState>,
        host: &'a HostContext,
    ) -> Self {
        Self { module_id, slot, widget_id, provider, host }
    }

    /// The owning module's provider instance for this slot, if it registered one.
    pub fn provider(&self) -> Option<&'a ProviderState> {
        self.provider
    }

    pub fn host(&self) -> &'a HostContext {
        self.host
    }
}

/// A renderable unit contributed to a slot.
pub trait Widget: Send + Sync {
    fn render(&self, cx: &WidgetContext<'_>) -> RenderNode;

    /// Handle a host event routed to this widget. Default: ignore.
    fn on_action(&self, _cx: &WidgetContext<'_>, _action: &Value) {}
}

/// Module-supplied wrapper whose state is shared by all of that module's
/// widgets within one slot mount.
pub trait ContextProvider: Send + Sync {
    fn name(&self) -> &str;

    fn initial_state(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// One live provider instance. Clones share the same state.
#[derive(Clone, Default)]
pub struct ProviderState {
    values: Arc<RwLock<Map<String, Value>>>,
}

impl ProviderState {
    pub fn new(initial: Map<String, Value>) -> Self {
        Self { values: Arc::new(RwLock::new(initial)) }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn same_instance(&self, other: &ProviderState) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl fmt::Debug for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProviderState").field(&self.snapshot()).finish()
    }
}

// ---------------------------------------------------------------------------
// Registration payload
// ---------------------------------------------------------------------------

/// A widget as declared by a module. Fields are optional because module code
/// is untrusted input; the slot engine validates each declaration and drops
/// the ones missing `id`, `priority` or `component`.
#[derive(Clone, Default)]
pub struct WidgetDeclaration {
    pub id: Option<String>,
    pub priority: Option<i32>,
    pub component: Option<Arc<dyn Widget>>,
    pub visibility: Option<Visibility>,
}

impl WidgetDeclaration {
    pub fn new(id: impl Into<String>, priority: i32, component: Arc<dyn Widget>) -> Self {
        Self {
            id: Some(id.into()),
            priority: Some(priority),
            component: Some(component),
            visibility: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

impl fmt::Debug for WidgetDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetDeclaration")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("component", &self.component.as_ref().map(|_| "<widget>"))
            .field("visibility", &self.visibility)
            .finish()
    }
}

/// What a module passes to `register()`.
#[derive(Clone, Default)]
pub struct RegistrationRequest {
    pub id: String,
    pub viewer_slots: IndexMap<String, Vec<WidgetDeclaration>>,
    pub context_provider: Option<Arc<dyn ContextProvider>>,
    pub version: Option<String>,
}

impl RegistrationRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    /// Append a widget to a slot, keeping declaration order.
    pub fn widget(mut self, slot: impl Into<String>, widget: WidgetDeclaration) -> Self {
        self.viewer_slots.entry(slot.into()).or_default().push(widget);
        self
    }

    pub fn context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Entry contract
// ---------------------------------------------------------------------------

/// Capability object handed to a module entry. It is the only way module
/// code reaches the registry, and it exposes nothing else of the host.
#[derive(Clone)]
pub struct ModuleHost {
    registry: Arc<ModuleRegistry>,
    bindings: Arc<SharedBindings>,
}

impl ModuleHost {
    pub fn new(registry: Arc<ModuleRegistry>, bindings: Arc<SharedBindings>) -> Self {
        Self { registry, bindings }
    }

    pub fn register(&self, request: RegistrationRequest) -> Option<Arc<RegisteredModule>> {
        self.registry.register(request)
    }

    pub fn bindings(&self) -> &Arc<SharedBindings> {
        &self.bindings
    }

    pub fn host_context(&self) -> HostContext {
        HostContext::new(Arc::clone(&self.bindings))
    }
}

/// The entry point of a module, bundled or remote. Activation is expected to
/// call [`ModuleHost::register`], now or later.
#[async_trait]
pub trait ModuleEntry: Send + Sync {
    async fn activate(&self, host: ModuleHost) -> anyhow::Result<()>;
}

/// Adapts a plain closure into a [`ModuleEntry`]; convenient for bundled
/// modules that register synchronously.
pub struct FnEntry<F>(pub F);

#[async_trait]
impl<F> ModuleEntry for FnEntry<F>
where
    F: Fn(&ModuleHost) -> anyhow::Result<()> + Send + Sync,
{
    async fn activate(&self, host: ModuleHost) -> anyhow::Result<()> {
        (self.0)(&host)
    }
}

pub fn entry_fn<F>(f: F) -> Arc<dyn ModuleEntry>
where
    F: Fn(&ModuleHost) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnEntry(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Label(&'static str);

    impl Widget for Label {
        fn render(&self, _cx: &WidgetContext<'_>) -> RenderNode {
            RenderNode::text(self.0)
        }
    }

    #[test]
    fn request_builder_groups_by_slot() {
        let request = RegistrationRequest::new("weather")
            .widget("context-panel", WidgetDeclaration::new("forecast", 10, Arc::new(Label("a"))))
            .widget("bottom-panel", WidgetDeclaration::new("timeline", 1, Arc::new(Label("b"))))
            .widget("context-panel", WidgetDeclaration::new("alerts", 20, Arc::new(Label("c"))))
            .version("2.1.0");
        let slots: Vec<_> = request.viewer_slots.keys().map(String::as_str).collect();
        assert_eq!(slots, vec!["context-panel", "bottom-panel"]);
        assert_eq!(request.viewer_slots["context-panel"].len(), 2);
        assert_eq!(request.version.as_deref(), Some("2.1.0"));
    }

    #[test]
    fn provider_state_clones_share_values() {
        let state = ProviderState::new(Map::new());
        let sibling = state.clone();
        state.set("selectedScan", json!("scan-3"));
        assert_eq!(sibling.get("selectedScan"), Some(json!("scan-3")));
        assert!(state.same_instance(&sibling));
        assert!(!state.same_instance(&ProviderState::default()));
    }

    #[test]
    fn render_node_serializes_compactly() {
        let node = RenderNode::element("Panel")
            .with_props(json!({"title": "Forecast"}))
            .with_child(RenderNode::text("22°C"));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "element");
        assert_eq!(json["children"][0]["text"], "22°C");
        let bare = serde_json::to_value(RenderNode::element("Spacer")).unwrap();
        assert!(bare.get("props").is_none());
    }
}
