//! Module Loader
//!
//! Turns catalog descriptors into registered modules. Bundled modules come
//! from a [`LocalModuleTable`]; remote ones are fetched, evaluated and
//! activated once per entry URL. Either way the loader only enforces timing:
//! a module counts as loaded once it has called `register()`.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use modhost_config::RuntimeConfig;
use modhost_core::{LoadFailure, LoadReport, ModuleDescriptor, SharedName};
use modhost_logging::{EventLogger, RuntimeEvent};

use crate::broker::SharedBindings;
use crate::declarative::ScriptExecutor;
use crate::fetch::ScriptFetcher;
use crate::lifecycle::ModuleState;
use crate::registry::{ModuleRegistry, RegisteredModule};
use crate::sdk::{ModuleEntry, ModuleHost};

pub type LoadResult = std::result::Result<Arc<RegisteredModule>, LoadFailure>;

type EntryFactory = Box<dyn Fn() -> Result<Arc<dyn ModuleEntry>> + Send + Sync>;

// ---------------------------------------------------------------------------
// Bundled modules
// ---------------------------------------------------------------------------

struct LocalModule {
    factory: EntryFactory,
    entry: once_cell::sync::OnceCell<std::result::Result<Arc<dyn ModuleEntry>, String>>,
}

/// Modules compiled into the host, keyed by id. Each factory runs at most
/// once; its outcome (entry or error) is kept for the session.
#[derive(Default)]
pub struct LocalModuleTable {
    modules: HashMap<String, LocalModule>,
}

impl LocalModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn ModuleEntry>> + Send + Sync + 'static,
    {
        self.modules.insert(
            id.into(),
            LocalModule { factory: Box::new(factory), entry: once_cell::sync::OnceCell::new() },
        );
    }

    /// Register an already-built entry.
    pub fn with_entry(mut self, id: impl Into<String>, entry: Arc<dyn ModuleEntry>) -> Self {
        self.insert(id, move || Ok(Arc::clone(&entry)));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Evaluate a bundled module. `None` when the id is not bundled.
    pub fn evaluate(&self, id: &str) -> Option<std::result::Result<Arc<dyn ModuleEntry>, String>> {
        let module = self.modules.get(id)?;
        let outcome = module.entry.get_or_init(|| {
            debug!(module = %id, "Evaluating bundled module");
            (module.factory)().map_err(|e| format!("{e:#}"))
        });
        Some(outcome.clone())
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub registration_timeout: Duration,
    /// Shared names that must be published before remote code runs.
    pub required_bindings: Vec<SharedName>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            registration_timeout: Duration::from_millis(
                modhost_config::defaults::DEFAULT_REGISTRATION_TIMEOUT_MS,
            ),
            required_bindings: SharedName::ALL.to_vec(),
        }
    }
}

impl LoaderOptions {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            registration_timeout: config.registration_timeout(),
            required_bindings: config.required_bindings(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Failure of the shared fetch/evaluate/activate step, before it is
/// attributed to a module id.
#[derive(Debug, Clone)]
enum StageFailure {
    Fetch { url: String, cause: String },
    Execution(String),
}

impl StageFailure {
    fn for_module(self, module_id: &str) -> LoadFailure {
        let module_id = module_id.to_string();
        match self {
            Self::Fetch { url, cause } => LoadFailure::Fetch { module_id, url, cause },
            Self::Execution(cause) => LoadFailure::Execution { module_id, cause },
        }
    }
}

type ExecutionCell = Arc<tokio::sync::OnceCell<std::result::Result<(), StageFailure>>>;

enum Strategy<'a> {
    Local,
    Remote(&'a str),
}

impl Strategy<'_> {
    fn label(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote(_) => "remote",
        }
    }
}

pub struct ModuleLoader {
    registry: Arc<ModuleRegistry>,
    bindings: Arc<SharedBindings>,
    fetcher: Arc<dyn ScriptFetcher>,
    executor: Arc<dyn ScriptExecutor>,
    local: LocalModuleTable,
    options: LoaderOptions,
    /// One execution per key: the entry URL for remote modules,
    /// `local:<id>` for bundled ones.
    executions: Mutex<HashMap<String, ExecutionCell>>,
    states: Mutex<HashMap<String, ModuleState>>,
}

impl ModuleLoader {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        bindings: Arc<SharedBindings>,
        fetcher: Arc<dyn ScriptFetcher>,
        executor: Arc<dyn ScriptExecutor>,
    ) -> Self {
        Self {
            registry,
            bindings,
            fetcher,
            executor,
            local: LocalModuleTable::new(),
            options: LoaderOptions::default(),
            executions: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_local_modules(mut self, table: LocalModuleTable) -> Self {
        self.local = table;
        self
    }

    pub fn with_options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn state(&self, module_id: &str) -> ModuleState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module_id)
            .copied()
            .unwrap_or(ModuleState::Pending)
    }

    fn set_state(&self, module_id: &str, state: ModuleState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module_id.to_string(), state);
    }

    /// Load one module. Never panics; every failure is returned as a value.
    pub async fn load(&self, descriptor: &ModuleDescriptor) -> LoadResult {
        let id = descriptor.id.trim();
        if id.is_empty() {
            return Err(LoadFailure::Unresolvable { module_id: String::new() });
        }
        if let Some(existing) = self.registry.get_registered(id) {
            debug!(module = %id, "Module already registered");
            return Ok(existing);
        }

        let started = std::time::Instant::now();
        self.set_state(id, ModuleState::Loading);
        let outcome = self.load_inner(id, descriptor).await;

        match &outcome {
            Ok((strategy, _)) => {
                let strategy = *strategy;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!(module = %id, strategy, elapsed_ms, "Module loaded");
                EventLogger::log_event(id, RuntimeEvent::ModuleLoaded { strategy, elapsed_ms });
                self.set_state(id, ModuleState::Registered);
            }
            Err(failure) => {
                warn!(module = %id, kind = failure.kind(), "Module failed to load: {failure}");
                EventLogger::log_event(
                    id,
                    RuntimeEvent::ModuleLoadFailed { kind: failure.kind(), error_msg: failure.to_string() },
                );
                self.set_state(id, ModuleState::Failed);
            }
        }
        outcome.map(|(_, module)| module)
    }

    async fn load_inner(
        &self,
        id: &str,
        descriptor: &ModuleDescriptor,
    ) -> std::result::Result<(&'static str, Arc<RegisteredModule>), LoadFailure> {
        let strategy = if descriptor.is_local && self.local.contains(id) {
            Strategy::Local
        } else if let Some(url) = descriptor.remote_url() {
            Strategy::Remote(url)
        } else if self.local.contains(id) {
            debug!(module = %id, "No entry URL; falling back to bundled module");
            Strategy::Local
        } else {
            return Err(LoadFailure::Unresolvable { module_id: id.to_string() });
        };

        if let Strategy::Remote(_) = strategy {
            let missing = self.bindings.missing(&self.options.required_bindings);
            if !missing.is_empty() {
                return Err(LoadFailure::MissingSharedDependencies {
                    module_id: id.to_string(),
                    missing: missing.iter().map(ToString::to_string).collect(),
                });
            }
        }

        let deadline = Instant::now() + self.options.registration_timeout;

        // Subscribe before anything runs so a synchronous register() is not missed.
        let (tx, rx) = oneshot::channel::<Arc<RegisteredModule>>();
        let tx = Mutex::new(Some(tx));
        let target = id.to_string();
        let _subscription = self.registry.subscribe(move |registered, module| {
            if registered != target {
                return;
            }
            if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = tx.send(Arc::clone(module));
            }
        });

        let executed = match strategy {
            Strategy::Local => {
                let key = format!("local:{id}");
                self.execute_once(key, self.run_local(id, deadline)).await
            }
            Strategy::Remote(url) => self.execute_once(url.to_string(), self.run_remote(url, deadline)).await,
        };
        executed.map_err(|stage| stage.for_module(id))?;

        if let Some(module) = self.registry.get_registered(id) {
            return Ok((strategy.label(), module));
        }
        match timeout_at(deadline, rx).await {
            Ok(Ok(module)) => Ok((strategy.label(), module)),
            Ok(Err(_)) | Err(_) => Err(LoadFailure::RegistrationTimeout {
                module_id: id.to_string(),
                timeout_ms: self.options.registration_timeout.as_millis() as u64,
            }),
        }
    }

    /// Run `work` unless an execution for `key` already ran or is running,
    /// in which case its outcome is shared.
    async fn execute_once<F>(&self, key: String, work: F) -> std::result::Result<(), StageFailure>
    where
        F: Future<Output = std::result::Result<(), StageFailure>>,
    {
        let cell = {
            let mut executions = self.executions.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(executions.entry(key).or_default())
        };
        cell.get_or_init(|| work).await.clone()
    }

    async fn run_local(&self, id: &str, deadline: Instant) -> std::result::Result<(), StageFailure> {
        let entry = match self.local.evaluate(id) {
            Some(Ok(entry)) => entry,
            Some(Err(cause)) => return Err(StageFailure::Execution(cause)),
            None => return Err(StageFailure::Execution(format!("no bundled entry for '{id}'"))),
        };
        self.activate(entry, deadline).await
    }

    async fn run_remote(&self, url: &str, deadline: Instant) -> std::result::Result<(), StageFailure> {
        let fetched = timeout_at(deadline, self.fetcher.fetch(url)).await.map_err(|_| StageFailure::Fetch {
            url: url.to_string(),
            cause: format!("timed out after {}ms", self.options.registration_timeout.as_millis()),
        })?;
        let source = fetched.map_err(|e| StageFailure::Fetch {
            url: url.to_string(),
            cause: e.to_string(),
        })?;
        let entry = self
            .executor
            .evaluate(url, &source)
            .map_err(|e| StageFailure::Execution(format!("{e:#}")))?;
        self.activate(entry, deadline).await
    }

    /// Activate on a separate task so a panicking module cannot unwind into
    /// the loader. An activation still running at the deadline is left alone;
    /// the registration wait reports the timeout.
    async fn activate(&self, entry: Arc<dyn ModuleEntry>, deadline: Instant) -> std::result::Result<(), StageFailure> {
        let host = ModuleHost::new(Arc::clone(&self.registry), Arc::clone(&self.bindings));
        let task = tokio::spawn(async move { entry.activate(host).await });
        match timeout_at(deadline, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(StageFailure::Execution(format!("{e:#}"))),
            Ok(Err(join)) if join.is_panic() => {
                Err(StageFailure::Execution(format!("module panicked: {}", panic_message(join.into_panic()))))
            }
            Ok(Err(_)) => Err(StageFailure::Execution("activation was cancelled".into())),
            Err(_) => {
                debug!("Activation still running at registration deadline");
                Ok(())
            }
        }
    }

    /// Load every catalog entry in order. One failure never stops the rest.
    pub async fn load_all(&self, catalog: &[ModuleDescriptor]) -> LoadReport {
        let mut report = LoadReport::default();
        for descriptor in catalog {
            match self.load(descriptor).await {
                Ok(module) => report.loaded.push(module.id.clone()),
                Err(failure) => report.failures.push(failure),
            }
        }
        info!(
            loaded = report.loaded.len(),
            failed = report.failures.len(),
            "Catalog load finished"
        );
        report
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declarative::DeclarativeExecutor;
    use crate::fetch::FetchError;
    use crate::sdk::{entry_fn, RegistrationRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed documents and counts requests.
    #[derive(Default)]
    struct MapFetcher {
        documents: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.documents.insert(url.into(), body.into());
            self
        }
    }

    #[async_trait]
    impl ScriptFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.documents
                .get(url)
                .map(|body| body.clone().into_bytes())
                .ok_or_else(|| FetchError::Status { url: url.into(), status: 404 })
        }
    }

    fn bindings_with_all() -> Arc<SharedBindings> {
        let bindings = SharedBindings::new();
        for name in SharedName::ALL {
            bindings.publish(name, Arc::new(name.to_string())).unwrap();
        }
        Arc::new(bindings)
    }

    fn loader(fetcher: Arc<MapFetcher>, bindings: Arc<SharedBindings>) -> ModuleLoader {
        ModuleLoader::new(
            Arc::new(ModuleRegistry::new()),
            bindings,
            fetcher,
            Arc::new(DeclarativeExecutor::default()),
        )
    }

    fn doc(id: &str) -> String {
        format!(r#"{{"id":"{id}","viewerSlots":{{"bottom-panel":[{{"id":"w","priority":1,"component":"Panel"}}]}}}}"#)
    }

    #[tokio::test]
    async fn local_module_registers() {
        let table = LocalModuleTable::new().with_entry(
            "weather",
            entry_fn(|host| {
                host.register(RegistrationRequest::new("weather").version("2.1.0"));
                Ok(())
            }),
        );
        let loader = loader(Arc::default(), Arc::new(SharedBindings::new())).with_local_modules(table);

        let module = loader.load(&ModuleDescriptor::local("weather")).await.unwrap();
        assert_eq!(module.version.as_deref(), Some("2.1.0"));
        assert_eq!(loader.state("weather"), ModuleState::Registered);
    }

    #[tokio::test]
    async fn unknown_local_without_url_is_unresolvable() {
        let loader = loader(Arc::default(), bindings_with_all());
        let err = loader.load(&ModuleDescriptor::local("ghost")).await.unwrap_err();
        assert_eq!(err, LoadFailure::Unresolvable { module_id: "ghost".into() });
        assert_eq!(loader.state("ghost"), ModuleState::Failed);
    }

    #[tokio::test]
    async fn remote_requires_shared_bindings() {
        let fetcher = Arc::new(MapFetcher::default().with("/m/lidar.json", &doc("lidar")));
        let bindings = SharedBindings::new();
        bindings.publish(SharedName::Session, Arc::new(())).unwrap();
        let loader = loader(Arc::clone(&fetcher), Arc::new(bindings));

        let err = loader.load(&ModuleDescriptor::remote("lidar", "/m/lidar.json")).await.unwrap_err();
        let LoadFailure::MissingSharedDependencies { missing, .. } = err else {
            panic!("expected missing shared dependencies, got {err:?}");
        };
        assert_eq!(missing, vec!["ui-runtime", "router", "design-kit", "viewer"]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_fetch_error_is_reported() {
        let loader = loader(Arc::default(), bindings_with_all());
        let err = loader.load(&ModuleDescriptor::remote("robots", "/m/robots.json")).await.unwrap_err();
        assert!(matches!(err, LoadFailure::Fetch { ref url, .. } if url == "/m/robots.json"));
    }

    #[tokio::test]
    async fn stalled_fetch_is_bounded_by_registration_timeout() {
        struct Stalled;

        #[async_trait]
        impl ScriptFetcher for Stalled {
            async fn fetch(&self, _url: &str) -> std::result::Result<Vec<u8>, FetchError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
        }

        let loader = ModuleLoader::new(
            Arc::new(ModuleRegistry::new()),
            bindings_with_all(),
            Arc::new(Stalled),
            Arc::new(DeclarativeExecutor::default()),
        )
        .with_options(LoaderOptions {
            registration_timeout: Duration::from_millis(100),
            required_bindings: Vec::new(),
        });

        let descriptor = ModuleDescriptor::remote("lidar", "/m/lidar.json");
        let load = loader.load(&descriptor);
        let err = tokio::time::timeout(Duration::from_secs(2), load)
            .await
            .expect("load settles within the registration timeout")
            .unwrap_err();
        let LoadFailure::Fetch { url, cause, .. } = err else {
            panic!("expected fetch failure, got {err:?}");
        };
        assert_eq!(url, "/m/lidar.json");
        assert!(cause.contains("timed out"));
        assert_eq!(loader.state("lidar"), ModuleState::Failed);
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let fetcher = Arc::new(MapFetcher::default().with("/m/lidar.json", &doc("lidar")));
        let loader = loader(Arc::clone(&fetcher), bindings_with_all());
        let descriptor = ModuleDescriptor::remote("lidar", "/m/lidar.json");

        let (a, b) = tokio::join!(loader.load(&descriptor), loader.load(&descriptor));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        loader.load(&descriptor).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entry_that_never_registers_times_out() {
        let table = LocalModuleTable::new().with_entry("silent", entry_fn(|_| Ok(())));
        let loader = loader(Arc::default(), bindings_with_all())
            .with_local_modules(table)
            .with_options(LoaderOptions {
                registration_timeout: Duration::from_millis(50),
                required_bindings: Vec::new(),
            });

        let err = loader.load(&ModuleDescriptor::local("silent")).await.unwrap_err();
        assert_eq!(
            err,
            LoadFailure::RegistrationTimeout { module_id: "silent".into(), timeout_ms: 50 }
        );
    }

    #[tokio::test]
    async fn panicking_entry_becomes_execution_failure() {
        let table = LocalModuleTable::new().with_entry("boom", entry_fn(|_| panic!("kaboom")));
        let loader = loader(Arc::default(), bindings_with_all()).with_local_modules(table);

        let err = loader.load(&ModuleDescriptor::local("boom")).await.unwrap_err();
        let LoadFailure::Execution { cause, .. } = err else {
            panic!("expected execution failure, got {err:?}");
        };
        assert!(cause.contains("kaboom"));
    }

    #[tokio::test]
    async fn late_registration_is_awaited() {
        struct Deferred;

        #[async_trait]
        impl ModuleEntry for Deferred {
            async fn activate(&self, host: ModuleHost) -> anyhow::Result<()> {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    host.register(RegistrationRequest::new("late"));
                });
                Ok(())
            }
        }

        let table = LocalModuleTable::new().with_entry("late", Arc::new(Deferred));
        let loader = loader(Arc::default(), bindings_with_all()).with_local_modules(table);
        let module = loader.load(&ModuleDescriptor::local("late")).await.unwrap();
        assert_eq!(module.id, "late");
    }

    #[test]
    fn local_factory_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut table = LocalModuleTable::new();
        table.insert("weather", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(entry_fn(|_| Ok(())))
        });
        assert!(table.evaluate("weather").unwrap().is_ok());
        assert!(table.evaluate("weather").unwrap().is_ok());
        assert!(table.evaluate("other").is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_all_isolates_failures() {
        let fetcher = Arc::new(
            MapFetcher::default()
                .with("/m/a.json", &doc("a"))
                .with("/m/c.json", &doc("c")),
        );
        let loader = loader(fetcher, bindings_with_all());
        let report = loader
            .load_all(&[
                ModuleDescriptor::remote("a", "/m/a.json"),
                ModuleDescriptor::remote("b", "/m/b.json"),
                ModuleDescriptor::remote("c", "/m/c.json"),
            ])
            .await;
        assert_eq!(report.loaded, vec!["a", "c"]);
        assert_eq!(report.failure_for("b").map(LoadFailure::kind), Some("fetch"));
    }
}
