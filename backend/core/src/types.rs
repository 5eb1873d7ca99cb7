use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LoadFailure;

/// Well-known slot names rendered by the host shell.
pub mod slot_names {
    pub const MAP_LAYER: &str = "map-layer";
    pub const CONTEXT_PANEL: &str = "context-panel";
    pub const BOTTOM_PANEL: &str = "bottom-panel";
    pub const DASHBOARD_WIDGET: &str = "dashboard-widget";
    pub const ENTITY_TREE: &str = "entity-tree";
    pub const LAYER_TOGGLE: &str = "layer-toggle";

    pub const ALL: [&str; 6] = [
        MAP_LAYER,
        CONTEXT_PANEL,
        BOTTOM_PANEL,
        DASHBOARD_WIDGET,
        ENTITY_TREE,
        LAYER_TOGGLE,
    ];
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Identity and delivery metadata for one installable module, as handed out
/// by the tenant catalog. Immutable for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    pub id: String,
    #[serde(default)]
    pub is_local: bool,
    /// Absolute URL or root-relative path. Required when `is_local` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_url: Option<String>,
    /// Informational only; no compatibility negotiation happens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ModuleDescriptor {
    pub fn local(id: impl Into<String>) -> Self {
        Self { id: id.into(), is_local: true, entry_url: None, version: None }
    }

    pub fn remote(id: impl Into<String>, entry_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_local: false,
            entry_url: Some(entry_url.into()),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// The remote entry URL, ignoring blank strings.
    pub fn remote_url(&self) -> Option<&str> {
        self.entry_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

/// Outcome of loading a whole catalog.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Ids that ended up registered, in catalog order.
    pub loaded: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure_for(&self, module_id: &str) -> Option<&LoadFailure> {
        self.failures.iter().find(|f| f.module_id() == module_id)
    }
}

// ---------------------------------------------------------------------------
// Shared binding names
// ---------------------------------------------------------------------------

/// The fixed set of singletons the host brokers to module code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SharedName {
    UiRuntime,
    Router,
    DesignKit,
    Session,
    Viewer,
}

impl SharedName {
    pub const ALL: [SharedName; 5] = [
        SharedName::UiRuntime,
        SharedName::Router,
        SharedName::DesignKit,
        SharedName::Session,
        SharedName::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UiRuntime => "ui-runtime",
            Self::Router => "router",
            Self::DesignKit => "design-kit",
            Self::Session => "session",
            Self::Viewer => "viewer",
        }
    }
}

impl fmt::Display for SharedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SharedName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown shared binding '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Live host state
// ---------------------------------------------------------------------------

/// Authentication snapshot published by the host. The token never appears
/// in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Session {
    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("roles", &self.roles)
            .field("tenant_id", &self.tenant_id)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// A selected entity in the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub id: String,
    pub entity_type: String,
}

impl EntityRef {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self { id: id.into(), entity_type: entity_type.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Camera {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub pitch: f64,
}

/// Selection, layer and camera state of the viewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerState {
    pub selected: Option<EntityRef>,
    #[serde(default)]
    pub active_layers: BTreeSet<String>,
    pub camera: Option<Camera>,
}

impl ViewerState {
    pub fn selected_entity_type(&self) -> Option<&str> {
        self.selected.as_ref().map(|e| e.entity_type.as_str())
    }
}

// ---------------------------------------------------------------------------
// Slot queries
// ---------------------------------------------------------------------------

/// The context a slot is composed against. Recomputed on every render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotQuery {
    pub slot: String,
    pub entity_type: Option<String>,
    pub active_layers: BTreeSet<String>,
}

impl SlotQuery {
    pub fn new(slot: impl Into<String>) -> Self {
        Self { slot: slot.into(), ..Default::default() }
    }

    pub fn from_viewer(slot: impl Into<String>, viewer: &ViewerState) -> Self {
        Self {
            slot: slot.into(),
            entity_type: viewer.selected_entity_type().map(str::to_owned),
            active_layers: viewer.active_layers.clone(),
        }
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.active_layers.insert(layer.into());
        self
    }
}

/// Declarative visibility rule attached to a widget contribution.
///
/// A missing or empty set places no constraint. `entity_types` requires the
/// current selection's type to be listed; `active_layers` requires at least
/// one listed layer to be active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_types: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_layers: Option<BTreeSet<String>>,
}

impl Visibility {
    pub fn entity_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_types: Some(types.into_iter().map(Into::into).collect()),
            active_layers: None,
        }
    }

    pub fn active_layers<I, S>(layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_types: None,
            active_layers: Some(layers.into_iter().map(Into::into).collect()),
        }
    }

    pub fn matches(&self, query: &SlotQuery) -> bool {
        let entity_ok = match self.entity_types.as_ref().filter(|s| !s.is_empty()) {
            None => true,
            Some(types) => query
                .entity_type
                .as_ref()
                .is_some_and(|t| types.contains(t)),
        };
        let layers_ok = match self.active_layers.as_ref().filter(|s| !s.is_empty()) {
            None => true,
            Some(layers) => layers.iter().any(|l| query.active_layers.contains(l)),
        };
        entity_ok && layers_ok
    }
}
