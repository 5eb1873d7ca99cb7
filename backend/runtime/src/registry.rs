//! Module registry: the single source of truth for which modules have
//! registered and what they contributed.
//!
//! Registration is an upsert keyed by module id. A re-registration replaces
//! the previous record in place, so the module keeps its original position
//! in registration order. Subscribers are notified synchronously, in
//! `register()` call order, after the table lock has been released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use modhost_logging::{EventLogger, RuntimeEvent};

use crate::lifecycle::{RegistryState, StateCell};
use crate::sdk::{ContextProvider, RegistrationRequest, WidgetDeclaration};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A module that has executed its entry point and called `register()`.
pub struct RegisteredModule {
    pub id: String,
    pub viewer_slots: IndexMap<String, Vec<WidgetDeclaration>>,
    pub context_provider: Option<Arc<dyn ContextProvider>>,
    pub version: Option<String>,
    pub registered_at: Instant,
    /// Global registration counter value at the time of this registration.
    pub sequence: u64,
}

impl RegisteredModule {
    /// Declarations for one slot; empty when the module contributes nothing there.
    pub fn slot(&self, name: &str) -> &[WidgetDeclaration] {
        self.viewer_slots.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.viewer_slots.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for RegisteredModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredModule")
            .field("id", &self.id)
            .field("viewer_slots", &self.viewer_slots)
            .field("context_provider", &self.context_provider.as_ref().map(|p| p.name().to_string()))
            .field("version", &self.version)
            .field("sequence", &self.sequence)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

pub type RegisterCallback = Arc<dyn Fn(&str, &Arc<RegisteredModule>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Removes its subscription when dropped.
pub struct SubscriptionGuard {
    registry: Arc<ModuleRegistry>,
    id: SubscriptionId,
}

impl SubscriptionGuard {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.remove_subscription(self.id);
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<IndexMap<String, Arc<RegisteredModule>>>,
    subscribers: Mutex<Vec<(SubscriptionId, RegisterCallback)>>,
    next_sequence: AtomicU64,
    next_subscription: AtomicU64,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a module. Never fails for the caller: a request with a blank id
    /// is dropped with a diagnostic and `None` is returned.
    pub fn register(&self, request: RegistrationRequest) -> Option<Arc<RegisteredModule>> {
        let id = request.id.trim().to_string();
        if id.is_empty() {
            warn!("[Registry] Ignoring registration without a module id");
            return None;
        }

        let record = Arc::new(RegisteredModule {
            id: id.clone(),
            viewer_slots: request.viewer_slots,
            context_provider: request.context_provider,
            version: request.version,
            registered_at: Instant::now(),
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        });

        let replaced = {
            let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
            modules.insert(id.clone(), Arc::clone(&record)).is_some()
        };

        EventLogger::log_event(
            &id,
            RuntimeEvent::ModuleRegistered {
                version: record.version.clone(),
                slots: record.slot_names().map(str::to_owned).collect(),
                replaced,
            },
        );
        if replaced {
            info!(module = %id, "Module re-registered; previous contributions replaced");
        }

        self.notify(&id, &record);
        Some(record)
    }

    fn notify(&self, id: &str, record: &Arc<RegisteredModule>) {
        let callbacks: Vec<RegisterCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        debug!(module = %id, subscribers = callbacks.len(), "Notifying registration subscribers");
        for callback in callbacks {
            callback(id, record);
        }
    }

    pub fn get_registered(&self, id: &str) -> Option<Arc<RegisteredModule>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Registered ids in registration order.
    pub fn get_registered_ids(&self) -> Vec<String> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// All records in registration order, taken under a single lock.
    pub fn snapshot(&self) -> Vec<Arc<RegisteredModule>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a module. Not part of the load path; hosts use it for teardown
    /// and tests for isolation. Subscribers are not notified.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self
            .modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(id)
            .is_some();
        if removed {
            info!(module = %id, "Module unregistered");
        }
        removed
    }

    /// Subscribe to future registrations.
    pub fn on_register<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &Arc<RegisteredModule>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Like [`Self::on_register`], but unsubscribes when the guard drops.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> SubscriptionGuard
    where
        F: Fn(&str, &Arc<RegisteredModule>) + Send + Sync + 'static,
    {
        let id = self.on_register(callback);
        SubscriptionGuard { registry: Arc::clone(self), id }
    }

    pub fn remove_subscription(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// ---------------------------------------------------------------------------
// Process-wide instance
// ---------------------------------------------------------------------------

static GLOBAL_REGISTRY: OnceCell<Arc<ModuleRegistry>> = OnceCell::new();
static GLOBAL_STATE: StateCell = StateCell::new();

/// Return the process-wide registry, creating it on first call. Every call
/// returns the same instance, whichever mount point calls first.
pub fn init_registry() -> Arc<ModuleRegistry> {
    let registry = GLOBAL_REGISTRY.get_or_init(|| {
        GLOBAL_STATE.advance(RegistryState::Initializing);
        info!("[Registry] Creating process-wide module registry");
        Arc::new(ModuleRegistry::new())
    });
    GLOBAL_STATE.advance(RegistryState::Ready);
    Arc::clone(registry)
}

pub fn registry_state() -> RegistryState {
    GLOBAL_STATE.get()
}
