//! In-process modules compiled into the host binary.
//!
//! Native modules register a factory per `(package, kind)` in a
//! [`ModuleCatalog`]. On disk they still have a version directory with a
//! `package.json`, which is how they are discovered and versioned.

use std::path::Path;
use std::sync::Arc;

use adc_core::error::LoaderError;
use adc_core::{ModuleHandle, ModuleKind, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{LoadRequest, Loader};

/// Constructor of a native module.
pub type ModuleFactory = Arc<dyn Fn(&LoadRequest) -> Result<ModuleHandle> + Send + Sync>;

/// Factories of native modules, keyed by package name and kind.
#[derive(Default)]
pub struct ModuleCatalog {
    factories: DashMap<(String, ModuleKind), ModuleFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. `package` is the `package.json` name
    /// (`@adc/cache`) or the bare unit name (`cache`).
    pub fn register<F>(&self, kind: ModuleKind, package: impl Into<String>, factory: F)
    where
        F: Fn(&LoadRequest) -> Result<ModuleHandle> + Send + Sync + 'static,
    {
        self.factories.insert((package.into(), kind), Arc::new(factory));
    }

    /// Swap the factory for a package, returning the previous one.
    ///
    /// The next load of that package, including a reload, uses the new code.
    pub fn replace<F>(&self, kind: ModuleKind, package: &str, factory: F) -> Option<ModuleFactory>
    where
        F: Fn(&LoadRequest) -> Result<ModuleHandle> + Send + Sync + 'static,
    {
        self.factories
            .insert((package.to_string(), kind), Arc::new(factory))
    }

    pub fn get(&self, kind: ModuleKind, package: &str) -> Option<ModuleFactory> {
        self.factories
            .get(&(package.to_string(), kind))
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, package: &str) -> bool {
        self.factories.iter().any(|entry| entry.key().0 == package)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Factory for a request: by package name, unit name, then requested name.
    fn resolve(&self, request: &LoadRequest) -> Option<ModuleFactory> {
        [
            request.package.name.as_str(),
            request.package.unit_name(),
            request.name.as_str(),
        ]
        .into_iter()
        .find_map(|package| self.get(request.kind, package))
    }
}

/// Loader for catalog modules.
pub struct NativeLoader {
    language: String,
    catalog: Arc<ModuleCatalog>,
}

impl NativeLoader {
    pub const LANGUAGE: &'static str = "rust";

    pub fn new(catalog: Arc<ModuleCatalog>) -> Self {
        Self {
            language: Self::LANGUAGE.to_string(),
            catalog,
        }
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }
}

#[async_trait]
impl Loader for NativeLoader {
    fn language(&self) -> &str {
        &self.language
    }

    fn can_handle(&self, path: &Path) -> bool {
        let suffix = format!("-{}", self.language);
        path.join("package.json").is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.ends_with(&suffix))
    }

    async fn load(&self, request: &LoadRequest) -> Result<ModuleHandle> {
        if !self.can_handle(&request.path) {
            return Err(LoaderError::ModuleNotFound {
                name: request.name.clone(),
                path: request.path.join("package.json"),
            }
            .into());
        }

        let factory = self.catalog.resolve(request).ok_or_else(|| LoaderError::InvalidModuleExport {
            name: request.name.clone(),
            kind: request.kind,
            reason: format!("package '{}' registers no {} factory", request.package.name, request.kind),
        })?;

        debug!(module = %request.name, import = %request.import_key(), "Instantiating native module");
        let handle = factory(request)?;

        if !handle.matches_kind(request.kind) {
            return Err(LoaderError::InvalidModuleExport {
                name: request.name.clone(),
                kind: request.kind,
                reason: if handle.is_app() {
                    "factory returned an app".to_string()
                } else {
                    "factory returned a component, expected an app".to_string()
                },
            }
            .into());
        }

        Ok(handle)
    }
}
