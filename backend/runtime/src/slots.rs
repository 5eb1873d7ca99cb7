//! Slot Composition Engine
//!
//! Computes the ordered, filtered widgets for a named slot and mounts them.
//! Ordering is `priority` ascending, then module registration order, then
//! widget id. A [`SlotMount`] owns one provider instance per contributing
//! module; every widget of that module in the slot shares it, and no other
//! module can reach it.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use modhost_core::{MalformedContribution, SlotQuery, ViewerState};
use modhost_logging::{EventLogger, RuntimeEvent};

use crate::bridge::HostContext;
use crate::registry::{ModuleRegistry, RegisteredModule, SubscriptionGuard};
use crate::sdk::{ContextProvider, ProviderState, RenderNode, Widget, WidgetContext, WidgetDeclaration};

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// A validated, visible contribution in render order.
#[derive(Clone)]
pub struct ResolvedWidget {
    pub module_id: String,
    pub widget_id: String,
    pub priority: i32,
    /// Position of the owning module in registration order.
    pub module_order: usize,
    pub component: Arc<dyn Widget>,
}

impl std::fmt::Debug for ResolvedWidget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedWidget")
            .field("module_id", &self.module_id)
            .field("widget_id", &self.widget_id)
            .field("priority", &self.priority)
            .field("module_order", &self.module_order)
            .finish_non_exhaustive()
    }
}

/// Check that a declaration carries everything needed to render it.
pub fn validate_declaration(
    module_id: &str,
    slot: &str,
    index: usize,
    declaration: &WidgetDeclaration,
) -> Result<(String, i32, Arc<dyn Widget>), MalformedContribution> {
    let id = declaration.id.as_deref().map(str::trim).filter(|id| !id.is_empty());
    match (id, declaration.priority, &declaration.component) {
        (Some(id), Some(priority), Some(component)) => Ok((id.to_string(), priority, Arc::clone(component))),
        (id, priority, component) => {
            let mut missing = Vec::new();
            if id.is_none() {
                missing.push("id");
            }
            if priority.is_none() {
                missing.push("priority");
            }
            if component.is_none() {
                missing.push("component");
            }
            Err(MalformedContribution {
                module_id: module_id.to_string(),
                slot: slot.to_string(),
                index,
                missing,
            })
        }
    }
}

/// Compose a slot against the current registry contents.
pub fn compose(registry: &ModuleRegistry, query: &SlotQuery) -> Vec<ResolvedWidget> {
    compose_modules(&registry.snapshot(), query)
}

fn compose_modules(modules: &[Arc<RegisteredModule>], query: &SlotQuery) -> Vec<ResolvedWidget> {
    let mut widgets = Vec::new();
    for (module_order, module) in modules.iter().enumerate() {
        let mut seen = HashSet::new();
        for (index, declaration) in module.slot(&query.slot).iter().enumerate() {
            let (widget_id, priority, component) =
                match validate_declaration(&module.id, &query.slot, index, declaration) {
                    Ok(valid) => valid,
                    Err(malformed) => {
                        EventLogger::log_event(
                            &module.id,
                            RuntimeEvent::ContributionDropped {
                                slot: query.slot.clone(),
                                error_msg: malformed.to_string(),
                            },
                        );
                        continue;
                    }
                };
            // Widget ids are unique within a module; the first declaration wins.
            if !seen.insert(widget_id.clone()) {
                EventLogger::log_event(
                    &module.id,
                    RuntimeEvent::ContributionDropped {
                        slot: query.slot.clone(),
                        error_msg: format!("duplicate widget id '{widget_id}' at index {index}"),
                    },
                );
                continue;
            }
            if let Some(visibility) = &declaration.visibility {
                if !visibility.matches(query) {
                    continue;
                }
            }
            widgets.push(ResolvedWidget {
                module_id: module.id.clone(),
                widget_id,
                priority,
                module_order,
                component,
            });
        }
    }
    widgets.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.module_order.cmp(&b.module_order))
            .then_with(|| a.widget_id.cmp(&b.widget_id))
    });
    debug!(slot = %query.slot, widgets = widgets.len(), "Slot composed");
    widgets
}

// ---------------------------------------------------------------------------
// Mounting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RenderedWidget {
    pub module_id: String,
    pub widget_id: String,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub node: RenderNode,
    /// Set when the widget panicked while rendering; `node` is then empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotRender {
    pub slot: String,
    pub widgets: Vec<RenderedWidget>,
}

impl SlotRender {
    pub fn widget_ids(&self) -> Vec<&str> {
        self.widgets.iter().map(|w| w.widget_id.as_str()).collect()
    }

    pub fn module_ids(&self) -> Vec<&str> {
        self.widgets.iter().map(|w| w.module_id.as_str()).collect()
    }
}

struct MountedProvider {
    provider: Arc<dyn ContextProvider>,
    state: ProviderState,
}

fn same_provider(a: &Arc<dyn ContextProvider>, b: &Arc<dyn ContextProvider>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// A live render point for one slot.
///
/// The mount goes stale when any module registers and when the viewer state
/// changes; the host calls [`SlotMount::render`] again in response.
pub struct SlotMount {
    slot: String,
    registry: Arc<ModuleRegistry>,
    host: HostContext,
    viewer: Option<watch::Receiver<ViewerState>>,
    providers: HashMap<String, MountedProvider>,
    last: Vec<ResolvedWidget>,
    stale: Arc<AtomicBool>,
    _subscription: SubscriptionGuard,
}

impl SlotMount {
    pub fn mount(slot: impl Into<String>, registry: Arc<ModuleRegistry>, host: HostContext) -> Self {
        let slot = slot.into();
        let stale = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&stale);
        let subscription = registry.subscribe(move |_, _| flag.store(true, Ordering::Release));
        let viewer = host.try_viewer().ok().map(|v| v.subscribe());
        if viewer.is_none() {
            debug!(slot = %slot, "Slot mounted without a viewer; composing without selection or layers");
        }
        Self {
            slot,
            registry,
            host,
            viewer,
            providers: HashMap::new(),
            last: Vec::new(),
            stale,
            _subscription: subscription,
        }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn needs_render(&self) -> bool {
        self.stale.load(Ordering::Acquire)
            || self.viewer.as_ref().is_some_and(|rx| rx.has_changed().unwrap_or(false))
    }

    /// The query the next render will use.
    pub fn query(&self) -> SlotQuery {
        match &self.viewer {
            Some(rx) => SlotQuery::from_viewer(&self.slot, &rx.borrow()),
            None => SlotQuery::new(&self.slot),
        }
    }

    /// Recompose and render every visible widget.
    pub fn render(&mut self) -> SlotRender {
        self.stale.store(false, Ordering::Release);
        let query = match &mut self.viewer {
            Some(rx) => SlotQuery::from_viewer(&self.slot, &rx.borrow_and_update()),
            None => SlotQuery::new(&self.slot),
        };

        let modules = self.registry.snapshot();
        self.sync_providers(&modules);
        self.last = compose_modules(&modules, &query);

        let widgets = self
            .last
            .iter()
            .map(|resolved| {
                let mounted = self.providers.get(&resolved.module_id);
                let cx = WidgetContext::new(
                    &resolved.module_id,
                    &self.slot,
                    &resolved.widget_id,
                    mounted.map(|p| &p.state),
                    &self.host,
                );
                let (node, error) = match catch_unwind(AssertUnwindSafe(|| resolved.component.render(&cx))) {
                    Ok(node) => (node, None),
                    Err(payload) => {
                        let msg = panic_text(payload.as_ref());
                        warn!(
                            module = %resolved.module_id,
                            widget = %resolved.widget_id,
                            slot = %self.slot,
                            "Widget panicked while rendering: {msg}"
                        );
                        (RenderNode::Empty, Some(msg))
                    }
                };
                RenderedWidget {
                    module_id: resolved.module_id.clone(),
                    widget_id: resolved.widget_id.clone(),
                    priority: resolved.priority,
                    provider: mounted.map(|p| p.provider.name().to_string()),
                    node,
                    error,
                }
            })
            .collect();

        SlotRender { slot: self.slot.clone(), widgets }
    }

    /// Keep one provider instance per module contributing to this slot. A
    /// module that re-registered with a different provider starts over from
    /// the new provider's initial state.
    fn sync_providers(&mut self, modules: &[Arc<RegisteredModule>]) {
        let slot = self.slot.as_str();
        self.providers.retain(|id, _| {
            modules.iter().any(|m| &m.id == id && !m.slot(slot).is_empty())
        });
        for module in modules {
            if module.slot(slot).is_empty() {
                continue;
            }
            let Some(provider) = &module.context_provider else {
                self.providers.remove(&module.id);
                continue;
            };
            let current = self
                .providers
                .get(&module.id)
                .is_some_and(|mounted| same_provider(&mounted.provider, provider));
            if !current {
                debug!(module = %module.id, slot, provider = provider.name(), "Mounting context provider");
                self.providers.insert(
                    module.id.clone(),
                    MountedProvider {
                        provider: Arc::clone(provider),
                        state: ProviderState::new(provider.initial_state()),
                    },
                );
            }
        }
    }

    /// Route a host event to one widget from the last render. Returns false
    /// when no such widget is mounted.
    pub fn dispatch(&self, module_id: &str, widget_id: &str, action: &Value) -> bool {
        let Some(resolved) = self
            .last
            .iter()
            .find(|w| w.module_id == module_id && w.widget_id == widget_id)
        else {
            debug!(module = %module_id, widget = %widget_id, slot = %self.slot, "No mounted widget for action");
            return false;
        };
        let cx = WidgetContext::new(
            &resolved.module_id,
            &self.slot,
            &resolved.widget_id,
            self.providers.get(module_id).map(|p| &p.state),
            &self.host,
        );
        if catch_unwind(AssertUnwindSafe(|| resolved.component.on_action(&cx, action))).is_err() {
            warn!(module = %module_id, widget = %widget_id, slot = %self.slot, "Widget panicked while handling an action");
        }
        true
    }

    /// The live provider state of one module in this mount.
    pub fn provider_state(&self, module_id: &str) -> Option<ProviderState> {
        self.providers.get(module_id).map(|p| p.state.clone())
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::publish_viewer;
    use crate::broker::SharedBindings;
    use crate::sdk::RegistrationRequest;
    use modhost_core::{EntityRef, Visibility};
    use serde_json::{json, Map};

    struct Label(&'static str);

    impl Widget for Label {
        fn render(&self, _cx: &WidgetContext<'_>) -> RenderNode {
            RenderNode::text(self.0)
        }
    }

    /// Shows the provider's `count` and increments it on any action.
    struct Counter;

    impl Widget for Counter {
        fn render(&self, cx: &WidgetContext<'_>) -> RenderNode {
            let count = cx.provider().and_then(|p| p.get("count")).unwrap_or(Value::Null);
            RenderNode::element("Counter").with_props(json!({ "count": count }))
        }

        fn on_action(&self, cx: &WidgetContext<'_>, _action: &Value) {
            if let Some(state) = cx.provider() {
                let next = state.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
                state.set("count", json!(next));
            }
        }
    }

    struct CountProvider;

    impl ContextProvider for CountProvider {
        fn name(&self) -> &str {
            "count"
        }

        fn initial_state(&self) -> Map<String, Value> {
            Map::from_iter([("count".to_string(), json!(0))])
        }
    }

    struct Exploding;

    impl Widget for Exploding {
        fn render(&self, _cx: &WidgetContext<'_>) -> RenderNode {
            panic!("render failed");
        }
    }

    fn widget(id: &str, priority: i32) -> WidgetDeclaration {
        WidgetDeclaration::new(id, priority, Arc::new(Label("x")))
    }

    fn host() -> HostContext {
        HostContext::new(Arc::new(SharedBindings::new()))
    }

    #[test]
    fn orders_by_priority_then_registration_then_id() {
        let registry = ModuleRegistry::new();
        registry.register(
            RegistrationRequest::new("first")
                .widget("bottom-panel", widget("zeta", 5))
                .widget("bottom-panel", widget("alpha", 5)),
        );
        registry.register(RegistrationRequest::new("second").widget("bottom-panel", widget("early", 1)));
        registry.register(RegistrationRequest::new("third").widget("bottom-panel", widget("tie", 5)));

        let ids: Vec<_> = compose(&registry, &SlotQuery::new("bottom-panel"))
            .into_iter()
            .map(|w| w.widget_id)
            .collect();
        assert_eq!(ids, vec!["early", "alpha", "zeta", "tie"]);
    }

    #[test]
    fn malformed_declarations_are_dropped() {
        let registry = ModuleRegistry::new();
        let mut broken = widget("broken", 1);
        broken.component = None;
        registry.register(
            RegistrationRequest::new("m")
                .widget("map-layer", broken)
                .widget("map-layer", widget("  ", 0))
                .widget("map-layer", widget("ok", 2)),
        );
        let widgets = compose(&registry, &SlotQuery::new("map-layer"));
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].widget_id, "ok");

        let Err(err) = validate_declaration("m", "map-layer", 0, &WidgetDeclaration::default()) else {
            panic!("empty declaration should be malformed");
        };
        assert_eq!(err.missing, vec!["id", "priority", "component"]);
    }

    #[test]
    fn duplicate_widget_ids_keep_the_first_declaration() {
        let registry = ModuleRegistry::new();
        registry.register(
            RegistrationRequest::new("weather")
                .widget("bottom-panel", WidgetDeclaration::new("forecast", 9, Arc::new(Label("first"))))
                .widget("bottom-panel", WidgetDeclaration::new("forecast", 1, Arc::new(Label("second")))),
        );
        registry.register(RegistrationRequest::new("lidar").widget("bottom-panel", widget("forecast", 5)));

        let widgets = compose(&registry, &SlotQuery::new("bottom-panel"));
        let keys: Vec<_> = widgets.iter().map(|w| (w.module_id.as_str(), w.priority)).collect();
        assert_eq!(keys, vec![("lidar", 5), ("weather", 9)]);

        let mut mount = SlotMount::mount("bottom-panel", Arc::new(registry), host());
        let render = mount.render();
        assert_eq!(render.widget_ids(), vec!["forecast", "forecast"]);
        assert_eq!(render.widgets[1].node, RenderNode::text("first"));
    }

    #[test]
    fn visibility_filters_by_entity_type() {
        let registry = ModuleRegistry::new();
        registry.register(
            RegistrationRequest::new("lidar").widget(
                "context-panel",
                widget("scan", 5).with_visibility(Visibility::entity_types(["AgriParcel"])),
            ),
        );
        let parcel = SlotQuery::new("context-panel").with_entity_type("AgriParcel");
        let sensor = SlotQuery::new("context-panel").with_entity_type("AgriSensor");
        assert_eq!(compose(&registry, &parcel).len(), 1);
        assert!(compose(&registry, &sensor).is_empty());
    }

    #[test]
    fn mount_follows_viewer_selection() {
        let bindings = Arc::new(SharedBindings::new());
        let viewer = publish_viewer(&bindings, Default::default()).unwrap();
        let registry = Arc::new(ModuleRegistry::new());
        registry.register(
            RegistrationRequest::new("lidar").widget(
                "context-panel",
                widget("scan", 5).with_visibility(Visibility::entity_types(["AgriParcel"])),
            ),
        );

        let mut mount = SlotMount::mount("context-panel", Arc::clone(&registry), HostContext::new(bindings));
        assert!(mount.needs_render());
        assert!(mount.render().widgets.is_empty());
        assert!(!mount.needs_render());

        viewer.select_entity(EntityRef::new("parcel-7", "AgriParcel"));
        assert!(mount.needs_render());
        assert_eq!(mount.render().widget_ids(), vec!["scan"]);
    }

    #[test]
    fn registration_marks_mount_stale() {
        let registry = Arc::new(ModuleRegistry::new());
        let mut mount = SlotMount::mount("bottom-panel", Arc::clone(&registry), host());
        mount.render();
        assert!(!mount.needs_render());

        registry.register(RegistrationRequest::new("late").widget("bottom-panel", widget("w", 0)));
        assert!(mount.needs_render());
        assert_eq!(mount.render().module_ids(), vec!["late"]);
    }

    #[test]
    fn provider_state_is_shared_within_a_module_only() {
        let registry = Arc::new(ModuleRegistry::new());
        registry.register(
            RegistrationRequest::new("lidar")
                .context_provider(Arc::new(CountProvider))
                .widget("bottom-panel", WidgetDeclaration::new("a", 1, Arc::new(Counter)))
                .widget("bottom-panel", WidgetDeclaration::new("b", 2, Arc::new(Counter))),
        );
        registry.register(
            RegistrationRequest::new("weather")
                .widget("bottom-panel", WidgetDeclaration::new("c", 3, Arc::new(Counter))),
        );

        let mut mount = SlotMount::mount("bottom-panel", Arc::clone(&registry), host());
        mount.render();
        assert!(mount.dispatch("lidar", "a", &json!({})));

        let render = mount.render();
        let counts: Vec<_> = render
            .widgets
            .iter()
            .map(|w| match &w.node {
                RenderNode::Element { props, .. } => props["count"].clone(),
                other => panic!("unexpected node {other:?}"),
            })
            .collect();
        assert_eq!(counts, vec![json!(1), json!(1), Value::Null]);
        assert_eq!(render.widgets[0].provider.as_deref(), Some("count"));
        assert!(mount.provider_state("weather").is_none());
    }

    #[test]
    fn re_registration_with_new_provider_resets_state() {
        let registry = Arc::new(ModuleRegistry::new());
        let provider: Arc<dyn ContextProvider> = Arc::new(CountProvider);
        let request = || {
            RegistrationRequest::new("lidar")
                .widget("bottom-panel", WidgetDeclaration::new("a", 1, Arc::new(Counter)))
        };
        registry.register(request().context_provider(Arc::clone(&provider)));

        let mut mount = SlotMount::mount("bottom-panel", Arc::clone(&registry), host());
        mount.render();
        mount.dispatch("lidar", "a", &json!({}));

        registry.register(request().context_provider(Arc::clone(&provider)));
        mount.render();
        assert_eq!(mount.provider_state("lidar").unwrap().get("count"), Some(json!(1)));

        registry.register(request().context_provider(Arc::new(CountProvider)));
        mount.render();
        assert_eq!(mount.provider_state("lidar").unwrap().get("count"), Some(json!(0)));
    }

    #[test]
    fn panicking_widget_does_not_blank_the_slot() {
        let registry = Arc::new(ModuleRegistry::new());
        registry.register(
            RegistrationRequest::new("m")
                .widget("dashboard-widget", WidgetDeclaration::new("bad", 1, Arc::new(Exploding)))
                .widget("dashboard-widget", widget("good", 2)),
        );
        let mut mount = SlotMount::mount("dashboard-widget", registry, host());
        let render = mount.render();
        assert_eq!(render.widget_ids(), vec!["bad", "good"]);
        assert_eq!(render.widgets[0].node, RenderNode::Empty);
        assert!(render.widgets[0].error.as_deref().unwrap().contains("render failed"));
        assert_eq!(render.widgets[1].node, RenderNode::text("x"));
    }

    #[test]
    fn dispatch_to_unknown_widget_is_rejected() {
        let registry = Arc::new(ModuleRegistry::new());
        let mount = SlotMount::mount("map-layer", registry, host());
        assert!(!mount.dispatch("ghost", "w", &json!({})));
    }
}
