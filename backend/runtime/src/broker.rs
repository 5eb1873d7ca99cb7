//! Shared-Dependency Broker
//!
//! Publishes the host's singleton objects under a fixed set of well-known
//! names so that separately compiled module code reaches the host's
//! instances instead of bringing its own copies.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use modhost_core::{BrokerError, SharedName};

type Erased = Arc<dyn Any + Send + Sync>;

/// Result of resolving a shared binding. Callers decide how to degrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding<T> {
    Available(T),
    NotYetPublished,
}

impl<T> Binding<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Available(v) => Some(v),
            Self::NotYetPublished => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Binding<U> {
        match self {
            Self::Available(v) => Binding::Available(f(v)),
            Self::NotYetPublished => Binding::NotYetPublished,
        }
    }
}

/// Identity of a brokered library (UI runtime, router, design kit) for hosts
/// that only need to prove a single instance is shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub name: String,
    pub version: String,
}

impl LibraryInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into() }
    }
}

/// Process-wide table of shared singletons. Each name is written once.
#[derive(Default)]
pub struct SharedBindings {
    entries: RwLock<HashMap<SharedName, Erased>>,
}

impl SharedBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` under `name`.
    ///
    /// Re-publishing the identical `Arc` is a no-op. Publishing a different
    /// value for a name that is already set is a host integration bug and
    /// returns [`BrokerError::AlreadyPublished`].
    pub fn publish<T: Any + Send + Sync>(&self, name: SharedName, value: Arc<T>) -> Result<(), BrokerError> {
        let value: Erased = value;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&name) {
            if same_allocation(existing, &value) {
                debug!(binding = %name, "Shared binding re-published with identical value");
                return Ok(());
            }
            return Err(BrokerError::AlreadyPublished { name: name.to_string() });
        }
        entries.insert(name, value);
        info!(binding = %name, "Published shared binding");
        Ok(())
    }

    /// Look up a binding. Never blocks; absent and wrongly-typed entries
    /// both resolve to [`Binding::NotYetPublished`].
    pub fn resolve<T: Any + Send + Sync>(&self, name: SharedName) -> Binding<Arc<T>> {
        let erased = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(&name) {
                Some(v) => Arc::clone(v),
                None => return Binding::NotYetPublished,
            }
        };
        match erased.downcast::<T>() {
            Ok(v) => Binding::Available(v),
            Err(_) => {
                warn!(
                    binding = %name,
                    requested = std::any::type_name::<T>(),
                    "Shared binding has a different type than requested"
                );
                Binding::NotYetPublished
            }
        }
    }

    pub fn is_published(&self, name: SharedName) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&name)
    }

    /// The subset of `names` that has not been published yet, in input order.
    pub fn missing(&self, names: &[SharedName]) -> Vec<SharedName> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        names.iter().copied().filter(|n| !entries.contains_key(n)).collect()
    }

    pub fn published(&self) -> Vec<SharedName> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = entries.keys().copied().collect();
        names.sort();
        names
    }
}

fn same_allocation(a: &Erased, b: &Erased) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

static GLOBAL_BINDINGS: OnceCell<Arc<SharedBindings>> = OnceCell::new();

/// The process-wide broker instance.
pub fn shared_bindings() -> Arc<SharedBindings> {
    Arc::clone(GLOBAL_BINDINGS.get_or_init(|| Arc::new(SharedBindings::new())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_before_publish_is_unavailable() {
        let bindings = SharedBindings::new();
        assert_eq!(bindings.resolve::<LibraryInfo>(SharedName::Router), Binding::NotYetPublished);
    }

    #[test]
    fn published_value_is_the_same_instance() {
        let bindings = SharedBindings::new();
        let router = Arc::new(LibraryInfo::new("router", "6.22.0"));
        bindings.publish(SharedName::Router, Arc::clone(&router)).unwrap();

        let Binding::Available(resolved) = bindings.resolve::<LibraryInfo>(SharedName::Router) else {
            panic!("router should be available");
        };
        assert!(Arc::ptr_eq(&resolved, &router));
    }

    #[test]
    fn double_publish_with_different_value_fails() {
        let bindings = SharedBindings::new();
        let kit = Arc::new(LibraryInfo::new("design-kit", "5.0.0"));
        bindings.publish(SharedName::DesignKit, Arc::clone(&kit)).unwrap();
        bindings.publish(SharedName::DesignKit, Arc::clone(&kit)).unwrap();

        let err = bindings
            .publish(SharedName::DesignKit, Arc::new(LibraryInfo::new("design-kit", "5.0.0")))
            .unwrap_err();
        assert_eq!(err, BrokerError::AlreadyPublished { name: "design-kit".into() });
    }

    #[test]
    fn wrong_type_resolves_as_unavailable() {
        let bindings = SharedBindings::new();
        bindings.publish(SharedName::UiRuntime, Arc::new(42_u32)).unwrap();
        assert!(!bindings.resolve::<LibraryInfo>(SharedName::UiRuntime).is_available());
        assert!(bindings.resolve::<u32>(SharedName::UiRuntime).is_available());
    }

    #[test]
    fn missing_reports_unpublished_names() {
        let bindings = SharedBindings::new();
        bindings.publish(SharedName::Session, Arc::new(())).unwrap();
        assert_eq!(
            bindings.missing(&[SharedName::Router, SharedName::Session, SharedName::Viewer]),
            vec![SharedName::Router, SharedName::Viewer]
        );
        assert_eq!(bindings.published(), vec![SharedName::Session]);
    }

    #[test]
    fn global_instance_is_stable() {
        assert!(Arc::ptr_eq(&shared_bindings(), &shared_bindings()));
    }
}
