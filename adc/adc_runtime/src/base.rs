//! Base module scaffolding.
//!
//! Concrete modules embed a [`BaseModule`] built from their [`LoadRequest`].
//! It carries the module's name and kind, a logger bound to that name, the
//! configuration (declared defaults overlaid with what the manifest
//! provided) and the scoped lookups of its [`ModuleContext`].

use std::any::Any;
use std::sync::Arc;

use adc_core::{Error, Instance, ModuleKind, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::ModuleContext;
use crate::loader::LoadRequest;
use crate::system::logging::ModuleLogger;

/// Deep-merge `overlay` into `base`.
///
/// Objects merge key by key; any other overlay value replaces the base
/// value. A `null` overlay leaves the base untouched.
pub fn merge_config(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_config(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Shared scaffolding for module implementations.
#[derive(Debug, Clone)]
pub struct BaseModule {
    name: String,
    kind: ModuleKind,
    discriminator: Option<String>,
    config: Value,
    context: Arc<ModuleContext>,
}

impl BaseModule {
    /// Build from a load request, overlaying the request's config on `defaults`.
    pub fn new(request: &LoadRequest, defaults: Value) -> Self {
        let mut config = defaults;
        merge_config(&mut config, &request.config);

        Self {
            name: request.name.clone(),
            kind: request.kind,
            discriminator: request.discriminator().map(str::to_string),
            config,
            context: request.context.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// The manifest's `type` for this instance, if any.
    pub fn discriminator(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }

    pub fn logger(&self) -> &ModuleLogger {
        self.context.logger()
    }

    pub fn context(&self) -> &Arc<ModuleContext> {
        &self.context
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    /// One top-level config value.
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// The merged configuration as a typed struct.
    pub fn config_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| Error::Config(format!("{}: {}", self.name, e)))
    }

    pub fn get_my_provider(&self, name: &str, discriminator: Option<&str>) -> Result<Instance> {
        self.context.get_my_provider(name, discriminator)
    }

    pub fn get_my_service(&self, name: &str, discriminator: Option<&str>) -> Result<Instance> {
        self.context.get_my_service(name, discriminator)
    }

    pub fn get_my_utility(&self, name: &str, discriminator: Option<&str>) -> Result<Instance> {
        self.context.get_my_utility(name, discriminator)
    }

    pub fn get_my_provider_as<T: Any + Send + Sync>(&self, name: &str, discriminator: Option<&str>) -> Result<Arc<T>> {
        self.context.get_my_provider_as(name, discriminator)
    }

    pub fn get_my_service_as<T: Any + Send + Sync>(&self, name: &str, discriminator: Option<&str>) -> Result<Arc<T>> {
        self.context.get_my_service_as(name, discriminator)
    }

    pub fn get_my_utility_as<T: Any + Send + Sync>(&self, name: &str, discriminator: Option<&str>) -> Result<Arc<T>> {
        self.context.get_my_utility_as(name, discriminator)
    }
}
