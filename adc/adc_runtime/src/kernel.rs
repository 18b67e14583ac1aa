//! The ADC kernel.
//!
//! The kernel turns manifests into running modules. A boot resolves every
//! required module on disk, orders them by their declared dependencies,
//! loads each layer concurrently through the loader for its language, and
//! registers a module only after its `start` has resolved. Failures follow
//! the owning manifest's `failOnError` policy: either the module is marked
//! failed and its dependents are skipped, or the whole boot is rolled back.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use adc_core::error::{LifecycleError, LoaderError, RegistryError, ResolutionError};
use adc_core::{
    EntryStatus, ErrorKind, InstanceId, Manifest, ModuleDescriptor, ModuleHandle, ModuleKind, Result,
    SymbolTable, TokenSource,
};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::ModuleContext;
use crate::loader::{LoadRequest, Loader, LoaderRegistry, ModuleCatalog, NativeLoader, ProcessLoader};
use crate::locator::{LocatedModule, ModuleLocator};
use crate::plan::{node_label, BootPlan};
use crate::registry::{EntrySnapshot, ModuleOrigin, ModuleRegistry, RegistryKey, Reservation, Retired};
use crate::system::config::RuntimeConfig;
use crate::system::shutdown::{ShutdownError, ShutdownManager};

/// A module that could not be brought up.
#[derive(Debug, Clone, Serialize)]
pub struct FailedModule {
    pub module: String,

    #[serde(serialize_with = "serialize_kind")]
    pub kind: ErrorKind,

    pub error: String,
}

fn serialize_kind<S: Serializer>(kind: &ErrorKind, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(kind.as_str())
}

/// Outcome of one boot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootReport {
    /// Every planned module, in the order it was settled
    pub order: Vec<String>,

    /// Modules that are ready, including ones an earlier boot started
    pub ready: Vec<String>,

    pub failed: Vec<FailedModule>,
}

impl BootReport {
    pub fn is_ready(&self, module: &str) -> bool {
        self.ready.iter().any(|m| m == module)
    }

    pub fn failure(&self, module: &str) -> Option<&FailedModule> {
        self.failed.iter().find(|f| f.module == module)
    }
}

/// What the kernel remembers about a module it brought up.
#[derive(Debug, Clone)]
struct Target {
    label: String,
    kind: ModuleKind,
    descriptor: ModuleDescriptor,
}

impl Target {
    fn new(kind: ModuleKind, descriptor: ModuleDescriptor) -> Self {
        Self {
            label: node_label(kind, &descriptor),
            kind,
            descriptor,
        }
    }
}

struct Activation {
    key: RegistryKey,
    fresh: bool,
}

/// Builder for [`Kernel`].
pub struct KernelBuilder {
    config: RuntimeConfig,
    catalog: Arc<ModuleCatalog>,
    symbols: Arc<SymbolTable>,
    loaders: Vec<Arc<dyn Loader>>,
}

impl KernelBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Native module factories available to the `rust` loader.
    pub fn catalog(mut self, catalog: Arc<ModuleCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn symbols(mut self, symbols: Arc<SymbolTable>) -> Self {
        self.symbols = symbols;
        self
    }

    /// Add a loader. It replaces a built-in loader of the same language.
    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn build(self) -> Kernel {
        let loaders = LoaderRegistry::new(self.config.default_language.clone());
        loaders.register(Arc::new(NativeLoader::new(self.catalog.clone())));
        for loader in ProcessLoader::from_config(&self.config) {
            loaders.register(Arc::new(loader));
        }
        for loader in self.loaders {
            loaders.register(loader);
        }

        Kernel {
            registry: Arc::new(ModuleRegistry::new(self.symbols)),
            catalog: self.catalog,
            loaders,
            locator: ModuleLocator::new(self.config.modules_root.clone(), self.config.default_language.clone()),
            shutdown: ShutdownManager::new(self.config.shutdown_timeout()),
            started: Mutex::new(Vec::new()),
            modules: DashMap::new(),
            failures: DashMap::new(),
            root: RwLock::new(Manifest::new()),
            load_seq: AtomicU64::new(0),
            config: self.config,
        }
    }
}

/// The module kernel.
pub struct Kernel {
    config: RuntimeConfig,
    registry: Arc<ModuleRegistry>,
    catalog: Arc<ModuleCatalog>,
    loaders: LoaderRegistry,
    locator: ModuleLocator,
    shutdown: ShutdownManager,

    /// Keys of booted modules, in start order
    started: Mutex<Vec<RegistryKey>>,

    /// Booted modules by key, for reloads
    modules: DashMap<RegistryKey, Target>,

    /// Modules whose last activation failed, by label
    failures: DashMap<String, FailedModule>,

    /// Union of every booted manifest; what the root context may look up
    root: RwLock<Manifest>,

    load_seq: AtomicU64,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder {
            config: RuntimeConfig::default(),
            catalog: Arc::new(ModuleCatalog::new()),
            symbols: Arc::new(SymbolTable::new()),
            loaders: Vec::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }

    pub fn loaders(&self) -> &LoaderRegistry {
        &self.loaders
    }

    pub fn locator(&self) -> &ModuleLocator {
        &self.locator
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        self.registry.symbols()
    }

    /// Boot every module `manifest` requires, transitively.
    ///
    /// Modules already ready from an earlier boot are reused. Returns `Err`
    /// when the dependency graph has a cycle (nothing is loaded) or when a
    /// module declared by a `failOnError` manifest fails (everything this
    /// boot started is stopped again, in reverse). Only a boot that returns
    /// `Ok` widens what [`root_context`](Self::root_context) may look up.
    pub async fn boot(&self, manifest: &Manifest) -> Result<BootReport> {
        manifest.validate()?;

        let plan = BootPlan::resolve(manifest, &self.locator).await;
        let layers = plan.layers().map_err(|e| {
            error!(error_kind = %e.kind(), error = %e, "Boot aborted");
            e
        })?;
        info!(modules = plan.nodes.len(), layers = layers.len(), "Booting manifest");

        let BootPlan { nodes, graph, .. } = plan;
        let mut targets = Vec::with_capacity(nodes.len());
        let mut fatal = Vec::with_capacity(nodes.len());
        let mut located = Vec::with_capacity(nodes.len());
        let mut unresolved = Vec::with_capacity(nodes.len());
        for node in nodes {
            targets.push(Target::new(node.kind, node.descriptor));
            fatal.push(node.fatal);
            match node.located {
                Ok(module) => {
                    located.push(Some(module));
                    unresolved.push(None);
                }
                Err(e) => {
                    located.push(None);
                    unresolved.push(Some(e));
                }
            }
        }

        let mut report = BootReport::default();
        let mut failed: HashSet<usize> = HashSet::new();
        let mut started_here: Vec<RegistryKey> = Vec::new();

        for layer in layers {
            let mut outcomes: Vec<(usize, Result<Activation>)> = Vec::with_capacity(layer.len());
            let mut runnable = Vec::new();

            for &node in &layer {
                if let Some(e) = unresolved[node].take() {
                    outcomes.push((node, Err(e)));
                } else if let Some(&dependency) = graph.dependencies(node).iter().find(|d| failed.contains(d)) {
                    let e = ResolutionError::DependencyFailed {
                        module: targets[node].label.clone(),
                        dependency: targets[dependency].label.clone(),
                    };
                    outcomes.push((node, Err(e.into())));
                } else {
                    runnable.push(node);
                }
            }

            let activations = runnable.iter().map(|&node| {
                let target = &targets[node];
                let module = located[node].as_ref();
                async move {
                    match module {
                        Some(module) => self.activate(target, module).await,
                        None => Err(LoaderError::ModuleNotFound {
                            name: target.descriptor.name.clone(),
                            path: self.locator.root().to_path_buf(),
                        }
                        .into()),
                    }
                }
            });
            let results = join_all(activations).await;
            outcomes.extend(runnable.iter().copied().zip(results));
            outcomes.sort_by_key(|(node, _)| *node);

            let mut abort = None;
            for (node, outcome) in outcomes {
                let label = targets[node].label.clone();
                report.order.push(label.clone());

                match outcome {
                    Ok(activation) => {
                        report.ready.push(label);
                        if activation.fresh {
                            started_here.push(activation.key);
                        }
                    }
                    Err(e) => {
                        error!(module = %label, error_kind = %e.kind(), error = %e, "Module failed");
                        failed.insert(node);
                        let failure = FailedModule {
                            module: label.clone(),
                            kind: e.kind(),
                            error: e.to_string(),
                        };
                        self.failures.insert(label, failure.clone());
                        report.failed.push(failure);
                        if fatal[node] && abort.is_none() {
                            abort = Some(e);
                        }
                    }
                }
            }

            if let Some(e) = abort {
                error!(started = started_here.len(), "Fatal module failure, rolling back boot");
                for key in started_here.iter().rev() {
                    self.stop_key(key).await;
                }
                return Err(e);
            }
        }

        self.extend_root(manifest);
        info!(ready = report.ready.len(), failed = report.failed.len(), "Boot complete");
        Ok(report)
    }

    /// Boot the manifest stored at `path`.
    pub async fn boot_file(&self, path: &Path) -> Result<BootReport> {
        let source = tokio::fs::read_to_string(path).await?;
        let manifest = Manifest::from_json(&path.display().to_string(), &source)?;
        self.boot(&manifest).await
    }

    /// Boot an app's dependencies, start it and wait for `run` to return.
    ///
    /// The app is stopped and unregistered afterwards whatever `run` returns.
    /// Kernel shutdown cancels the token `run` receives.
    pub async fn run_app(&self, name: &str, version: Option<&str>) -> Result<()> {
        let mut descriptor = ModuleDescriptor::new(name);
        if let Some(version) = version {
            descriptor = descriptor.with_version(version);
        }
        let target = Target::new(ModuleKind::App, descriptor);
        let located = self.locator.locate(ModuleKind::App, &target.descriptor).await?;

        let report = self.boot(&located.manifest).await?;
        if !report.failed.is_empty() {
            warn!(app = %name, failed = report.failed.len(), "Starting app with failed dependencies");
        }

        let key = self.registry.key(ModuleKind::App, name, None);
        let reservation = self.registry.reserve(key.clone(), false, false)?;
        let handle = match self.instantiate(&reservation, &target, &located).await {
            Ok(handle) => handle,
            Err(e) => {
                self.discard(&reservation, &target.label).await;
                return Err(e);
            }
        };
        self.commit_started(&reservation, &target.label, &handle).await?;

        let Some(app) = handle.as_app() else {
            self.registry
                .unregister(&key, &self.shutdown.token(), self.shutdown.stop_timeout())
                .await;
            return Err(LoaderError::InvalidModuleExport {
                name: name.to_string(),
                kind: ModuleKind::App,
                reason: "module does not implement run".to_string(),
            }
            .into());
        };

        info!(app = %name, version = %located.version, language = %located.language, "Running app");
        let token = self.shutdown.token();
        let result = app.run(&token).await;
        match &result {
            Ok(()) => info!(app = %name, "App finished"),
            Err(e) => error!(app = %name, error_kind = %e.kind(), error = %e, "App failed"),
        }

        self.registry
            .unregister(&key, &token, self.shutdown.stop_timeout())
            .await;
        result
    }

    /// Replace a booted module with a freshly loaded instance.
    ///
    /// The module is located again, so a newer installed version is picked
    /// up. The old instance keeps serving lookups until the new one has
    /// started; a failed reload leaves it in place.
    pub async fn reload(&self, kind: ModuleKind, name: &str, discriminator: Option<&str>) -> Result<InstanceId> {
        let key = self.registry.key(kind, name, discriminator);
        let target = self
            .modules
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::CapabilityNotFound {
                kind,
                capability: describe(name, discriminator),
            })?;

        let located = self.locator.locate(kind, &target.descriptor).await?;
        let reservation = self.registry.reserve(key, target.descriptor.default, true)?;

        let handle = match self.instantiate(&reservation, &target, &located).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(module = %target.label, error = %e, "Reload failed, keeping current instance");
                self.discard(&reservation, &target.label).await;
                return Err(e);
            }
        };

        if let Some(retired) = self.commit_started(&reservation, &target.label, &handle).await? {
            if let Some(handle) = retired.handle {
                self.stop_handle(&target.label, &handle).await;
            }
            debug!(module = %target.label, instance = %retired.id, "Retired previous instance");
        }

        info!(module = %target.label, version = %located.version, instance = %reservation.id(), "Reloaded module");
        Ok(reservation.id())
    }

    /// Stop and remove one module. Returns `false` if it was not loaded.
    pub async fn unload(&self, kind: ModuleKind, name: &str, discriminator: Option<&str>) -> bool {
        let key = self.registry.key(kind, name, discriminator);
        self.stop_key(&key).await
    }

    /// Stop every booted module in reverse start order.
    ///
    /// Cancels every token handed to modules first, so running apps return.
    pub async fn shutdown(&self) -> std::result::Result<(), ShutdownError> {
        self.shutdown.begin()?;

        let started = std::mem::take(&mut *self.started.lock());
        info!(modules = started.len(), "Stopping modules");
        for key in started.iter().rev() {
            self.registry
                .unregister(key, &self.shutdown.token(), self.shutdown.stop_timeout())
                .await;
            self.modules.remove(key);
        }

        info!("Kernel shutdown complete");
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Status of a module: its registry status, or `Failed` if its last
    /// activation failed.
    pub fn status(&self, kind: ModuleKind, name: &str, discriminator: Option<&str>) -> Option<EntryStatus> {
        let key = self.registry.key(kind, name, discriminator);
        self.registry.status(&key).or_else(|| {
            let mut descriptor = ModuleDescriptor::new(name);
            descriptor.discriminator = discriminator.map(str::to_string);
            self.failures
                .contains_key(&node_label(kind, &descriptor))
                .then_some(EntryStatus::Failed)
        })
    }

    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        self.registry.snapshot()
    }

    /// Modules whose last activation failed.
    pub fn failures(&self) -> Vec<FailedModule> {
        let mut failures: Vec<FailedModule> = self.failures.iter().map(|f| f.value().clone()).collect();
        failures.sort_by(|a, b| a.module.cmp(&b.module));
        failures
    }

    /// A context scoped to everything the booted manifests declared.
    pub fn root_context(&self) -> Arc<ModuleContext> {
        Arc::new(ModuleContext::new(
            "kernel",
            ModuleKind::App,
            self.registry.clone(),
            &self.root.read(),
            self.config.log_level,
        ))
    }

    fn extend_root(&self, manifest: &Manifest) {
        let mut root = self.root.write();
        for (kind, descriptor) in manifest.requirements() {
            let known = root
                .descriptors(kind)
                .iter()
                .any(|d| d.name == descriptor.name && d.discriminator == descriptor.discriminator);
            if !known {
                let current = std::mem::take(&mut *root);
                *root = current.require(kind, descriptor.clone());
            }
        }
    }

    async fn activate(&self, target: &Target, located: &LocatedModule) -> Result<Activation> {
        let key = self
            .registry
            .key(target.kind, &target.descriptor.name, target.descriptor.discriminator.as_deref());
        if self.registry.status(&key) == Some(EntryStatus::Ready) {
            debug!(module = %target.label, "Already loaded");
            return Ok(Activation { key, fresh: false });
        }

        let reservation = self.registry.reserve(key.clone(), target.descriptor.default, false)?;
        let handle = match self.instantiate(&reservation, target, located).await {
            Ok(handle) => handle,
            Err(e) => {
                self.discard(&reservation, &target.label).await;
                return Err(e);
            }
        };
        self.commit_started(&reservation, &target.label, &handle).await?;

        self.started.lock().push(key.clone());
        self.modules.insert(key.clone(), target.clone());
        self.failures.remove(&target.label);
        info!(
            module = %target.label,
            version = %located.version,
            language = %located.language,
            "Module ready"
        );
        Ok(Activation { key, fresh: true })
    }

    /// Load and start one module into `reservation`.
    async fn instantiate(
        &self,
        reservation: &Reservation,
        target: &Target,
        located: &LocatedModule,
    ) -> Result<ModuleHandle> {
        let context = Arc::new(ModuleContext::new(
            target.label.clone(),
            target.kind,
            self.registry.clone(),
            &located.manifest,
            self.config.log_level,
        ));
        let request = LoadRequest {
            kind: target.kind,
            name: target.descriptor.name.clone(),
            path: located.path.clone(),
            version: located.version.clone(),
            language: located.language.clone(),
            package: located.package.clone(),
            descriptor: target.descriptor.clone(),
            config: target
                .descriptor
                .config
                .clone()
                .unwrap_or_else(|| Value::Object(Default::default())),
            context,
            load_seq: self.load_seq.fetch_add(1, Ordering::SeqCst) + 1,
        };

        let loader = self.loaders.get(&located.language)?;
        debug!(module = %target.label, loader = %loader.language(), import = %request.import_key(), "Loading module");
        let handle = loader.load(&request).await?;
        if !handle.matches_kind(target.kind) {
            return Err(LoaderError::InvalidModuleExport {
                name: target.descriptor.name.clone(),
                kind: target.kind,
                reason: format!("loader '{}' returned the wrong module shape", loader.language()),
            }
            .into());
        }

        self.registry.attach(
            reservation,
            handle.clone(),
            ModuleOrigin {
                version: located.version.clone(),
                language: located.language.clone(),
                path: located.path.clone(),
                load_seq: request.load_seq,
            },
        );

        self.start_handle(&target.label, &handle).await?;
        Ok(handle)
    }

    /// Run `start` under the start timeout; the token is cancelled if it expires.
    async fn start_handle(&self, label: &str, handle: &ModuleHandle) -> Result<()> {
        let attempt = TokenSource::new();
        let token = attempt.token();
        match tokio::time::timeout(self.config.start_timeout(), handle.start(&token)).await {
            Ok(result) => result,
            Err(_) => {
                attempt.cancel();
                Err(LifecycleError::Timeout {
                    module: label.to_string(),
                    phase: "start",
                    timeout_ms: self.config.start_timeout_ms,
                }
                .into())
            }
        }
    }

    async fn stop_handle(&self, label: &str, handle: &ModuleHandle) {
        let token = self.shutdown.token();
        match tokio::time::timeout(self.shutdown.stop_timeout(), handle.stop(&token)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(module = %label, error = %e, "Module stop failed"),
            Err(_) => warn!(module = %label, "Module stop timed out"),
        }
    }

    /// Promote a started reservation. If the module was unloaded while it
    /// started, the commit fails and the new instance is stopped here.
    async fn commit_started(
        &self,
        reservation: &Reservation,
        label: &str,
        handle: &ModuleHandle,
    ) -> Result<Option<Retired>> {
        match self.registry.commit(reservation) {
            Ok(retired) => Ok(retired),
            Err(e) => {
                warn!(module = %label, error = %e, "Module was unloaded while starting");
                self.stop_handle(label, handle).await;
                Err(e.into())
            }
        }
    }

    /// Drop a failed reservation, stopping whatever got loaded into it.
    async fn discard(&self, reservation: &Reservation, label: &str) {
        if let Some(retired) = self.registry.abandon(reservation) {
            if let Some(handle) = retired.handle {
                self.stop_handle(label, &handle).await;
            }
        }
    }

    async fn stop_key(&self, key: &RegistryKey) -> bool {
        let removed = self
            .registry
            .unregister(key, &self.shutdown.token(), self.shutdown.stop_timeout())
            .await;
        self.started.lock().retain(|k| k != key);
        self.modules.remove(key);
        removed
    }
}

fn describe(name: &str, discriminator: Option<&str>) -> String {
    match discriminator {
        Some(d) => format!("{}#{}", name, d),
        None => name.to_string(),
    }
}
