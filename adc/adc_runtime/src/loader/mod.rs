//! Module loaders.
//!
//! A loader turns a located module directory plus its configuration into a
//! live [`ModuleHandle`]. Loaders are selected by language through the
//! [`LoaderRegistry`].

pub mod native;
pub mod process;
pub mod registry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adc_core::{ModuleDescriptor, ModuleHandle, ModuleKind, PackageDescriptor, Result, Version};
use async_trait::async_trait;
use serde_json::Value;

use crate::context::ModuleContext;

pub use native::{ModuleCatalog, ModuleFactory, NativeLoader};
pub use process::{ExternalEndpoint, ProcessLoader};
pub use registry::LoaderRegistry;

/// Everything a loader needs to instantiate one module.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub kind: ModuleKind,

    /// Capability name as requested in the manifest
    pub name: String,

    /// Resolved version directory
    pub path: PathBuf,

    pub version: Version,
    pub language: String,
    pub package: PackageDescriptor,
    pub descriptor: ModuleDescriptor,

    /// Configuration from the requesting manifest (`{}` when absent)
    pub config: Value,

    /// Scoped kernel access for the new instance
    pub context: Arc<ModuleContext>,

    /// Monotonic per-kernel load counter
    pub load_seq: u64,
}

impl LoadRequest {
    /// Key that makes this load observably distinct from earlier loads of the
    /// same path.
    pub fn import_key(&self) -> String {
        format!("{}?v={}", self.path.display(), self.load_seq)
    }

    pub fn discriminator(&self) -> Option<&str> {
        self.descriptor.discriminator.as_deref()
    }
}

/// A per-language loading strategy.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Language tag handled by this loader, as used in version directory names.
    fn language(&self) -> &str;

    /// Whether `path` holds this language's canonical entry.
    fn can_handle(&self, path: &Path) -> bool;

    /// Instantiate the module described by `request`.
    ///
    /// Not idempotent: every call runs the module's initialisation anew.
    async fn load(&self, request: &LoadRequest) -> Result<ModuleHandle>;
}
