//! Integration between the CLI and the ADC runtime
//!
//! Builds a kernel from the configuration file and command-line overrides.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adc_runtime::{Kernel, ModuleCatalog, RuntimeConfig};
use anyhow::{Context, Result};

/// Load the runtime configuration, applying a modules root override.
pub async fn load_config(config: Option<&Path>, root: Option<&PathBuf>) -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::load(config)
        .await
        .context("Failed to load runtime configuration")?;
    if let Some(root) = root {
        config.modules_root = root.clone();
    }
    Ok(config)
}

/// Build a kernel with the built-in loaders.
///
/// The CLI links no native modules, so `rust` modules on disk fail with
/// `InvalidModuleExport`; external languages run through their process
/// loaders.
pub async fn kernel(config: Option<&Path>, root: Option<&PathBuf>) -> Result<Arc<Kernel>> {
    let config = load_config(config, root).await?;
    Ok(Arc::new(adc_runtime::bootstrap(config, Arc::new(ModuleCatalog::new()))))
}
