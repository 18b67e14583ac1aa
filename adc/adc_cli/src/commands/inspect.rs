//! Inspect command
//!
//! Lists the modules installed under the modules root.

use std::path::PathBuf;

use adc_runtime::ModuleLocator;
use anyhow::Result;
use clap::Args;

use crate::integration;

/// Arguments for the inspect command
#[derive(Args)]
pub struct InspectArgs {
    /// Modules root to inspect
    #[clap(long)]
    pub root: Option<PathBuf>,

    /// Runtime configuration file (JSON or TOML)
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Print the listing as JSON
    #[clap(long)]
    pub json: bool,
}

/// Implementation of the inspect command
pub async fn execute_inspect(args: &InspectArgs) -> Result<()> {
    let config = integration::load_config(args.config.as_deref(), args.root.as_ref()).await?;
    let locator = ModuleLocator::new(config.modules_root.clone(), config.default_language.clone());
    let modules = locator.discover().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    if modules.is_empty() {
        println!("No modules found under {}", locator.root().display());
        return Ok(());
    }

    for module in &modules {
        let name = match &module.category {
            Some(category) => format!("{}/{}", category, module.name),
            None => module.name.clone(),
        };
        let versions: Vec<String> = module.versions.iter().map(|v| v.dir_name()).collect();
        println!("{:<11} {:<32} {}", module.kind.as_str(), name, versions.join(", "));
    }
    Ok(())
}
