//! Preset scaffolding
//!
//! `create-preset <name>` lays out a new native preset under the modules
//! root: a package descriptor, an empty manifest and a stub type built on
//! `BaseModule`.

use std::path::{Path, PathBuf};

use adc_core::PackageDescriptor;
use anyhow::{Context, Result};
use clap::Args;
use thiserror::Error;
use tokio::fs;

/// Version directory of a freshly scaffolded preset.
pub const INITIAL_VERSION_DIR: &str = "1.0.0-rust";

/// Errors specific to scaffolding
#[derive(Debug, Error)]
pub enum ScaffoldError {
    #[error("Invalid preset name '{0}': use lowercase letters, digits, '-' and '_'")]
    InvalidName(String),

    #[error("Preset '{name}' already exists at {}", path.display())]
    AlreadyExists { name: String, path: PathBuf },
}

/// Arguments for the create-preset command
#[derive(Args)]
pub struct CreatePresetArgs {
    /// Name of the new preset
    pub name: String,

    /// Modules root to create the preset under
    #[clap(long, default_value = "./modules")]
    pub root: PathBuf,
}

/// Implementation of the create-preset command
pub async fn execute_create_preset(args: &CreatePresetArgs) -> Result<()> {
    let path = create_preset(&args.root, &args.name).await?;
    println!("Created preset '{}' at {}", args.name, path.display());
    Ok(())
}

/// Write the preset skeleton and return its version directory.
pub async fn create_preset(root: &Path, name: &str) -> Result<PathBuf> {
    validate_name(name)?;

    let preset_dir = root.join("presets").join(name);
    if fs::metadata(&preset_dir).await.is_ok() {
        return Err(ScaffoldError::AlreadyExists {
            name: name.to_string(),
            path: preset_dir,
        }
        .into());
    }

    let version_dir = preset_dir.join(INITIAL_VERSION_DIR);
    fs::create_dir_all(&version_dir)
        .await
        .with_context(|| format!("Failed to create {}", version_dir.display()))?;

    let package = PackageDescriptor::new(format!("@adc/{}", name));
    let package_json = serde_json::to_string_pretty(&package)?;
    fs::write(version_dir.join("package.json"), package_json + "\n").await?;
    fs::write(version_dir.join("modules.json"), "{}\n").await?;
    fs::write(version_dir.join("index.rs"), render_stub(name, &package.name)).await?;

    Ok(version_dir)
}

fn validate_name(name: &str) -> Result<(), ScaffoldError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && name.starts_with(|c: char| c.is_ascii_lowercase());
    if valid {
        Ok(())
    } else {
        Err(ScaffoldError::InvalidName(name.to_string()))
    }
}

/// `json-file-adapter` -> `JsonFileAdapter`.
fn type_name(name: &str) -> String {
    name.split(|c: char| c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn render_stub(name: &str, package: &str) -> String {
    let type_name = format!("{}Preset", type_name(name));
    STUB_TEMPLATE
        .replace("{{type_name}}", &type_name)
        .replace("{{package}}", package)
        .replace("{{name}}", name)
}

const STUB_TEMPLATE: &str = r#"//! The `{{name}}` preset.

use std::sync::Arc;

use adc_core::{Component, Instance, Lifecycle, LifecycleToken, ModuleHandle, ModuleKind, Result};
use adc_runtime::{BaseModule, LoadRequest, ModuleCatalog};
use async_trait::async_trait;
use serde_json::json;

pub struct {{type_name}} {
    base: BaseModule,
}

impl {{type_name}} {
    pub fn new(request: &LoadRequest) -> Self {
        Self {
            base: BaseModule::new(request, json!({})),
        }
    }
}

#[async_trait]
impl Lifecycle for {{type_name}} {
    async fn start(&self, _token: &LifecycleToken) -> Result<()> {
        self.base.logger().ok("started");
        Ok(())
    }

    async fn stop(&self, _token: &LifecycleToken) -> Result<()> {
        self.base.logger().info("stopped");
        Ok(())
    }
}

impl Component for {{type_name}} {
    fn get_instance(&self) -> Instance {
        Arc::new(self.base.config().clone())
    }
}

/// Make the preset loadable by the kernel.
pub fn register(catalog: &ModuleCatalog) {
    catalog.register(ModuleKind::Preset, "{{package}}", |request: &LoadRequest| {
        Ok(ModuleHandle::component({{type_name}}::new(request)))
    });
}
"#;
