//! Run-app command

use std::path::PathBuf;

use adc_runtime::system::shutdown::wait_for_signal;
use anyhow::{Context, Result};
use clap::Args;
use tracing::warn;

use crate::integration;

/// Arguments for the run-app command
#[derive(Args)]
pub struct RunAppArgs {
    /// Name of the app under `apps/`
    pub name: String,

    /// Version requirement; the latest installed version when absent
    #[clap(long)]
    pub version: Option<String>,

    /// Runtime configuration file (JSON or TOML)
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Override the modules root
    #[clap(long)]
    pub root: Option<PathBuf>,
}

/// Implementation of the run-app command
///
/// Ctrl-C shuts the kernel down, which cancels the app's token.
pub async fn execute_run_app(args: &RunAppArgs) -> Result<()> {
    let kernel = integration::kernel(args.config.as_deref(), args.root.as_ref()).await?;

    let watcher = {
        let kernel = kernel.clone();
        tokio::spawn(async move {
            if wait_for_signal().await.is_ok() {
                if let Err(e) = kernel.shutdown().await {
                    warn!("Shutdown after interrupt failed: {}", e);
                }
            }
        })
    };

    let result = kernel.run_app(&args.name, args.version.as_deref()).await;
    watcher.abort();

    if !kernel.is_shutting_down() {
        kernel.shutdown().await?;
    }

    result.with_context(|| format!("App '{}' failed", args.name))
}
