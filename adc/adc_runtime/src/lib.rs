//! ADC Runtime - the module kernel
//!
//! This crate loads, versions, wires and supervises the pluggable units of
//! an ADC application: it locates modules on disk, plans their start order
//! from their manifests, instantiates them through per-language loaders,
//! keeps them in the module registry and scopes each module's lookups to
//! what it declared.

pub mod base;
pub mod context;
pub mod kernel;
pub mod loader;
pub mod locator;
pub mod plan;
pub mod registry;
pub mod system;

use std::sync::Arc;

use tracing::info;

pub use base::{merge_config, BaseModule};
pub use context::ModuleContext;
pub use kernel::{BootReport, FailedModule, Kernel, KernelBuilder};
pub use loader::{LoadRequest, Loader, ModuleCatalog};
pub use locator::ModuleLocator;
pub use registry::{EntrySnapshot, ModuleRegistry};
pub use system::{ModuleLogger, RuntimeConfig};

/// Install logging for `config` and build a kernel over `catalog`.
pub fn bootstrap(config: RuntimeConfig, catalog: Arc<ModuleCatalog>) -> Kernel {
    system::logging::init(config.log_level);

    info!(
        modules_root = %config.modules_root.display(),
        dev_mode = config.dev_mode,
        languages = config.languages.len(),
        "Initializing ADC kernel"
    );

    Kernel::builder().config(config).catalog(catalog).build()
}
