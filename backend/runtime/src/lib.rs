//! `modhost-runtime`: loads tenant modules into a running host and composes
//! their contributions into named slots.

pub mod bridge;
pub mod broker;
pub mod catalog;
pub mod declarative;
pub mod fetch;
pub mod lifecycle;
pub mod loader;
pub mod registry;
pub mod sdk;
pub mod slots;

pub use bridge::{publish_session, publish_viewer, AuthState, HostContext, SessionHandle, ViewerHandle};
pub use broker::{shared_bindings, Binding, LibraryInfo, SharedBindings};
pub use catalog::{load_catalog, parse_catalog};
pub use declarative::{DeclarativeExecutor, DeclaredWidget, ExportMap, ModuleDocument, ScriptExecutor};
pub use fetch::{FetchError, FsFetcher, HttpFetcher, RoutingFetcher, ScriptFetcher};
pub use lifecycle::{ModuleState, RegistryState};
pub use loader::{LoadResult, LoaderOptions, LocalModuleTable, ModuleLoader};
pub use registry::{
    init_registry, registry_state, ModuleRegistry, RegisterCallback, RegisteredModule, SubscriptionGuard,
    SubscriptionId,
};
pub use sdk::{
    entry_fn, ContextProvider, FnEntry, ModuleEntry, ModuleHost, ProviderState, RegistrationRequest, RenderNode,
    Widget, WidgetContext, WidgetDeclaration,
};
pub use slots::{compose, validate_declaration, RenderedWidget, ResolvedWidget, SlotMount, SlotRender};
