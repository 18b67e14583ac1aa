//! Scoped module context.
//!
//! Every module is constructed with a [`ModuleContext`] that only resolves
//! the capabilities its own manifest declared. Anything else fails with
//! `UndeclaredDependency`, even if the capability is loaded.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use adc_core::error::{LoaderError, ResolutionError};
use adc_core::{CapabilityId, Instance, LogLevel, Manifest, ModuleKind, Result, SymbolTable};

use crate::registry::{ModuleRegistry, RegistryKey};
use crate::system::logging::ModuleLogger;

#[derive(Debug, Clone)]
struct Declared {
    discriminator: Option<Arc<str>>,
    default: bool,
}

/// The lookups one module is authorised to perform.
pub struct ModuleContext {
    module: String,
    kind: ModuleKind,
    registry: Arc<ModuleRegistry>,
    declared: HashMap<(ModuleKind, CapabilityId), Vec<Declared>>,
    logger: ModuleLogger,
}

impl ModuleContext {
    /// Build the context of `module`, authorised for what `manifest` requires.
    pub fn new(
        module: impl Into<String>,
        kind: ModuleKind,
        registry: Arc<ModuleRegistry>,
        manifest: &Manifest,
        log_level: LogLevel,
    ) -> Self {
        let module = module.into();
        let mut declared: HashMap<(ModuleKind, CapabilityId), Vec<Declared>> = HashMap::new();

        for (required_kind, descriptor) in manifest.requirements() {
            let capability = registry.symbols().intern(&descriptor.name);
            declared
                .entry((required_kind, capability))
                .or_default()
                .push(Declared {
                    discriminator: descriptor.discriminator.as_deref().map(Arc::from),
                    default: descriptor.default,
                });
        }

        Self {
            logger: ModuleLogger::new(module.clone(), log_level),
            module,
            kind,
            registry,
            declared,
        }
    }

    pub fn name(&self) -> &str {
        &self.module
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn logger(&self) -> &ModuleLogger {
        &self.logger
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        self.registry.symbols()
    }

    /// Whether this module declared `kind`/`name` (and `discriminator`, if given).
    pub fn is_declared(&self, kind: ModuleKind, name: &str, discriminator: Option<&str>) -> bool {
        self.authorise(kind, name, discriminator).is_ok()
    }

    /// Resolve a declared capability to its live instance.
    ///
    /// Without a discriminator the lookup goes to the registry's default
    /// entry when this module declared it. Otherwise it falls back to the
    /// undiscriminated declaration, the declaration marked `default`, then
    /// the first declared. Instances must not be cached: re-resolve on every
    /// use so reloads take effect.
    pub fn lookup(&self, kind: ModuleKind, name: &str, discriminator: Option<&str>) -> Result<Instance> {
        let (capability, discriminator) = self.authorise(kind, name, discriminator)?;
        let key = RegistryKey {
            kind,
            capability,
            discriminator,
        };
        Ok(self.registry.lookup_exact(&key)?)
    }

    /// [`lookup`](Self::lookup), downcast to `T`.
    pub fn lookup_as<T: Any + Send + Sync>(
        &self,
        kind: ModuleKind,
        name: &str,
        discriminator: Option<&str>,
    ) -> Result<Arc<T>> {
        let instance = self.lookup(kind, name, discriminator)?;
        instance.downcast::<T>().map_err(|_| {
            LoaderError::InvalidModuleExport {
                name: name.to_string(),
                kind,
                reason: format!("instance is not a {}", type_name::<T>()),
            }
            .into()
        })
    }

    pub fn get_my_provider(&self, name: &str, discriminator: Option<&str>) -> Result<Instance> {
        self.lookup(ModuleKind::Provider, name, discriminator)
    }

    pub fn get_my_service(&self, name: &str, discriminator: Option<&str>) -> Result<Instance> {
        self.lookup(ModuleKind::Service, name, discriminator)
    }

    pub fn get_my_utility(&self, name: &str, discriminator: Option<&str>) -> Result<Instance> {
        self.lookup(ModuleKind::Utility, name, discriminator)
    }

    pub fn get_my_provider_as<T: Any + Send + Sync>(
        &self,
        name: &str,
        discriminator: Option<&str>,
    ) -> Result<Arc<T>> {
        self.lookup_as(ModuleKind::Provider, name, discriminator)
    }

    pub fn get_my_service_as<T: Any + Send + Sync>(
        &self,
        name: &str,
        discriminator: Option<&str>,
    ) -> Result<Arc<T>> {
        self.lookup_as(ModuleKind::Service, name, discriminator)
    }

    pub fn get_my_utility_as<T: Any + Send + Sync>(
        &self,
        name: &str,
        discriminator: Option<&str>,
    ) -> Result<Arc<T>> {
        self.lookup_as(ModuleKind::Utility, name, discriminator)
    }

    fn authorise(
        &self,
        kind: ModuleKind,
        name: &str,
        discriminator: Option<&str>,
    ) -> std::result::Result<(CapabilityId, Option<Arc<str>>), ResolutionError> {
        let undeclared = || ResolutionError::UndeclaredDependency {
            module: self.module.clone(),
            kind,
            capability: match discriminator {
                Some(d) => format!("{}#{}", name, d),
                None => name.to_string(),
            },
        };

        let capability = self.symbols().lookup(name).ok_or_else(undeclared)?;
        let declarations = self.declared.get(&(kind, capability)).ok_or_else(undeclared)?;

        let chosen = match discriminator {
            Some(wanted) => declarations
                .iter()
                .find(|d| d.discriminator.as_deref() == Some(wanted)),
            None => {
                let registry_default = self.registry.default_discriminator(kind, capability);
                registry_default
                    .and_then(|default| declarations.iter().find(|d| d.discriminator == default))
                    .or_else(|| declarations.iter().find(|d| d.discriminator.is_none()))
                    .or_else(|| declarations.iter().find(|d| d.default))
                    .or_else(|| declarations.first())
            }
        };

        chosen
            .map(|d| (capability, d.discriminator.clone()))
            .ok_or_else(undeclared)
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module)
            .field("kind", &self.kind)
            .field("declared", &self.declared.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModuleOrigin;
    use adc_core::{Component, ErrorKind, Lifecycle, ModuleDescriptor, ModuleHandle, Version};
    use std::path::PathBuf;

    struct Named(&'static str);

    impl Lifecycle for Named {}

    impl Component for Named {
        fn get_instance(&self) -> Instance {
            Arc::new(self.0.to_string())
        }
    }

    fn registry_with(entries: &[(&str, Option<&str>, bool)]) -> Arc<ModuleRegistry> {
        let registry = Arc::new(ModuleRegistry::new(Arc::new(SymbolTable::new())));
        for (name, discriminator, is_default) in entries {
            let key = registry.key(ModuleKind::Provider, name, *discriminator);
            let reservation = registry.reserve(key, *is_default, false).unwrap();
            let label: &'static str = match discriminator {
                Some("redis") => "redis",
                Some("memory") => "memory",
                _ => "plain",
            };
            registry.attach(
                &reservation,
                ModuleHandle::component(Named(label)),
                ModuleOrigin {
                    version: Version::new(1, 0, 0),
                    language: "rust".to_string(),
                    path: PathBuf::new(),
                    load_seq: 0,
                },
            );
            registry.commit(&reservation).unwrap();
        }
        registry
    }

    #[test]
    fn test_undeclared_lookup_is_rejected() {
        let registry = registry_with(&[("storage", None, false), ("cache", None, false)]);
        let manifest = Manifest::new().require(ModuleKind::Provider, ModuleDescriptor::new("storage"));
        let context = ModuleContext::new("service:billing", ModuleKind::Service, registry, &manifest, LogLevel::Info);

        assert!(context.get_my_provider("storage", None).is_ok());

        let err = context.get_my_provider("cache", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndeclaredDependency);

        // Declared as a provider, not as a service.
        let err = context.get_my_service("storage", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndeclaredDependency);

        // Never interned anywhere.
        let err = context.get_my_utility("nothing-by-this-name", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndeclaredDependency);
    }

    #[test]
    fn test_discriminated_declarations() {
        let registry = registry_with(&[("cache", Some("redis"), true), ("cache", Some("memory"), false)]);
        let manifest = Manifest::new()
            .require(
                ModuleKind::Provider,
                ModuleDescriptor::new("cache").with_discriminator("memory"),
            );
        let context = ModuleContext::new("preset:auth", ModuleKind::Preset, registry, &manifest, LogLevel::Info);

        let value = context.get_my_provider_as::<String>("cache", None).unwrap();
        assert_eq!(value.as_str(), "memory");

        let err = context.get_my_provider("cache", Some("redis")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndeclaredDependency);
    }

    #[test]
    fn test_undiscriminated_lookup_follows_registry_default() {
        let registry = registry_with(&[("cache", Some("redis"), true), ("cache", Some("memory"), false)]);
        let manifest = Manifest::new()
            .require(
                ModuleKind::Provider,
                ModuleDescriptor::new("cache").with_discriminator("memory"),
            )
            .require(
                ModuleKind::Provider,
                ModuleDescriptor::new("cache").with_discriminator("redis"),
            );
        let context = ModuleContext::new("service:billing", ModuleKind::Service, registry, &manifest, LogLevel::Info);

        let value = context.get_my_provider_as::<String>("cache", None).unwrap();
        assert_eq!(value.as_str(), "redis");
        let memory = context.get_my_provider_as::<String>("cache", Some("memory")).unwrap();
        assert_eq!(memory.as_str(), "memory");
    }

    #[test]
    fn test_declared_but_not_loaded() {
        let registry = registry_with(&[]);
        let manifest = Manifest::new().require(ModuleKind::Utility, ModuleDescriptor::new("adapter"));
        let context = ModuleContext::new("app:web", ModuleKind::App, registry, &manifest, LogLevel::Info);

        let err = context.get_my_utility("adapter", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapabilityNotFound);
    }

    #[test]
    fn test_wrong_type_is_invalid_export() {
        let registry = registry_with(&[("storage", None, false)]);
        let manifest = Manifest::new().require(ModuleKind::Provider, ModuleDescriptor::new("storage"));
        let context = ModuleContext::new("root", ModuleKind::App, registry, &manifest, LogLevel::Info);

        let err = context.get_my_provider_as::<u64>("storage", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidModuleExport);
    }
}
