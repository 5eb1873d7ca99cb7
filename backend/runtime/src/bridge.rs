//! Host Context Bridge
//!
//! Accessors module code uses to read live host state through the broker.
//! Authentication degrades to [`AuthState::Anonymous`] when no session is
//! published; the viewer accessor fails fast, since a widget mounted outside
//! any viewer is an integration bug.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use modhost_core::{BridgeError, BrokerError, Camera, EntityRef, Session, SharedName, ViewerState};

use crate::broker::{shared_bindings, Binding, SharedBindings};

// ---------------------------------------------------------------------------
// Live handles
// ---------------------------------------------------------------------------

/// Live session object. The host replaces the snapshot on login, logout and
/// token refresh; readers always see the latest value.
#[derive(Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<Session>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        let (tx, _rx) = watch::channel(session);
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn replace(&self, session: Session) {
        debug!(tenant = ?session.tenant_id, "Session replaced");
        self.tx.send_replace(session);
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }
}

/// Live viewer state plus the fixed set of mutators modules may call.
#[derive(Clone)]
pub struct ViewerHandle {
    tx: Arc<watch::Sender<ViewerState>>,
}

impl ViewerHandle {
    pub fn new(state: ViewerState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> ViewerState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerState> {
        self.tx.subscribe()
    }

    pub fn select_entity(&self, entity: EntityRef) {
        self.tx.send_modify(|s| s.selected = Some(entity));
    }

    pub fn clear_selection(&self) {
        self.tx.send_if_modified(|s| s.selected.take().is_some());
    }

    pub fn set_layer_active(&self, layer: &str, active: bool) {
        self.tx.send_if_modified(|s| {
            if active {
                s.active_layers.insert(layer.to_string())
            } else {
                s.active_layers.remove(layer)
            }
        });
    }

    /// Flip a layer and return whether it is now active.
    pub fn toggle_layer(&self, layer: &str) -> bool {
        let mut now_active = false;
        self.tx.send_modify(|s| {
            now_active = if s.active_layers.remove(layer) {
                false
            } else {
                s.active_layers.insert(layer.to_string())
            };
        });
        now_active
    }

    pub fn set_camera(&self, camera: Camera) {
        self.tx.send_modify(|s| s.camera = Some(camera));
    }
}

/// Create and publish the live session. Called once during host start-up.
pub fn publish_session(bindings: &SharedBindings, session: Session) -> Result<SessionHandle, BrokerError> {
    let handle = SessionHandle::new(session);
    bindings.publish(SharedName::Session, Arc::new(handle.clone()))?;
    Ok(handle)
}

/// Create and publish the live viewer state. Called once per viewer mount.
pub fn publish_viewer(bindings: &SharedBindings, state: ViewerState) -> Result<ViewerHandle, BrokerError> {
    let handle = ViewerHandle::new(state);
    bindings.publish(SharedName::Viewer, Arc::new(handle.clone()))?;
    Ok(handle)
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuthState {
    Anonymous,
    Authenticated {
        user_id: Option<String>,
        tenant_id: Option<String>,
        roles: Vec<String>,
    },
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn has_role(&self, role: &str) -> bool {
        match self {
            Self::Authenticated { roles, .. } => roles.iter().any(|r| r == role),
            Self::Anonymous => false,
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        match self {
            Self::Authenticated { tenant_id, .. } => tenant_id.as_deref(),
            Self::Anonymous => None,
        }
    }
}

/// Read-side view of host state handed to widgets and module entries.
#[derive(Clone)]
pub struct HostContext {
    bindings: Arc<SharedBindings>,
}

impl HostContext {
    pub fn new(bindings: Arc<SharedBindings>) -> Self {
        Self { bindings }
    }

    /// Context over the process-wide broker.
    pub fn global() -> Self {
        Self::new(shared_bindings())
    }

    pub fn bindings(&self) -> &Arc<SharedBindings> {
        &self.bindings
    }

    /// Current session snapshot, if a session has been published.
    pub fn session(&self) -> Option<Session> {
        self.bindings
            .resolve::<SessionHandle>(SharedName::Session)
            .into_option()
            .map(|h| h.snapshot())
    }

    /// Never fails. No session, or a session without a token, is anonymous.
    pub fn auth(&self) -> AuthState {
        match self.session() {
            Some(session) if session.has_token() => AuthState::Authenticated {
                user_id: session.user_id,
                tenant_id: session.tenant_id,
                roles: session.roles,
            },
            _ => AuthState::Anonymous,
        }
    }

    pub fn try_viewer(&self) -> Result<ViewerHandle, BridgeError> {
        match self.bindings.resolve::<ViewerHandle>(SharedName::Viewer) {
            Binding::Available(handle) => Ok(ViewerHandle::clone(&handle)),
            Binding::NotYetPublished => Err(BridgeError::ViewerUnavailable {
                name: SharedName::Viewer.to_string(),
            }),
        }
    }

    /// # Panics
    ///
    /// Panics when no viewer has been published. Use [`Self::try_viewer`]
    /// where the caller can legitimately run outside a viewer.
    pub fn viewer(&self) -> ViewerHandle {
        match self.try_viewer() {
            Ok(handle) => handle,
            Err(err) => panic!("{err}"),
        }
    }
}
