//! Loader Registry
//!
//! Selects the loader for a module by its declared language.

use std::path::Path;
use std::sync::Arc;

use adc_core::{Error, Result};
use parking_lot::RwLock;
use tracing::{info, warn};

use super::Loader;

/// Loaders keyed by language, in registration order.
pub struct LoaderRegistry {
    loaders: RwLock<Vec<Arc<dyn Loader>>>,
    default_language: String,
}

impl LoaderRegistry {
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            loaders: RwLock::new(Vec::new()),
            default_language: default_language.into(),
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Register a loader, replacing any loader for the same language in place.
    pub fn register(&self, loader: Arc<dyn Loader>) {
        let mut loaders = self.loaders.write();
        match loaders.iter().position(|l| l.language() == loader.language()) {
            Some(index) => {
                info!(language = %loader.language(), "Replaced loader");
                loaders[index] = loader;
            }
            None => {
                info!(language = %loader.language(), "Registered loader");
                loaders.push(loader);
            }
        }
    }

    /// Loader for `language`.
    ///
    /// An unknown language falls back to the default language's loader, with
    /// a warning: the module may be loaded by the wrong strategy.
    pub fn get(&self, language: &str) -> Result<Arc<dyn Loader>> {
        let loaders = self.loaders.read();
        if let Some(loader) = loaders.iter().find(|l| l.language() == language) {
            return Ok(loader.clone());
        }

        let fallback = loaders
            .iter()
            .find(|l| l.language() == self.default_language)
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!(
                    "No loader for '{}' and no default '{}' loader registered",
                    language, self.default_language
                ))
            })?;

        warn!(
            language = %language,
            fallback = %self.default_language,
            "No loader registered for language, falling back"
        );
        Ok(fallback)
    }

    /// First loader, in registration order, that recognises `path`.
    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn Loader>> {
        self.loaders
            .read()
            .iter()
            .find(|l| l.can_handle(path))
            .cloned()
    }

    pub fn languages(&self) -> Vec<String> {
        self.loaders
            .read()
            .iter()
            .map(|l| l.language().to_string())
            .collect()
    }
}
