//! Boot command
//!
//! Boots a manifest with the built-in loaders and prints what came up.

use std::path::PathBuf;

use adc_runtime::system::shutdown::wait_for_signal;
use adc_runtime::BootReport;
use anyhow::{Context, Result};
use clap::Args;

use crate::integration;

/// Arguments for the boot command
#[derive(Args)]
pub struct BootArgs {
    /// Path to the manifest (`modules.json`) to boot
    #[clap(long)]
    pub manifest: PathBuf,

    /// Runtime configuration file (JSON or TOML)
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Override the modules root
    #[clap(long)]
    pub root: Option<PathBuf>,

    /// Print the report as JSON
    #[clap(long)]
    pub json: bool,

    /// Keep modules running until interrupted
    #[clap(long)]
    pub wait: bool,
}

/// Implementation of the boot command
pub async fn execute_boot(args: &BootArgs) -> Result<()> {
    let kernel = integration::kernel(args.config.as_deref(), args.root.as_ref()).await?;

    let report = kernel
        .boot_file(&args.manifest)
        .await
        .with_context(|| format!("Boot of {} failed", args.manifest.display()))?;
    print_report(&report, args.json)?;

    if args.wait {
        println!("Running; press Ctrl-C to stop");
        wait_for_signal().await?;
    }

    kernel.shutdown().await?;
    Ok(())
}

pub fn print_report(report: &BootReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for module in &report.order {
        match report.failure(module) {
            Some(failure) => println!("failed  {:<32} {}: {}", module, failure.kind, failure.error),
            None => println!("ready   {}", module),
        }
    }
    println!(
        "{} ready, {} failed",
        report.ready.len(),
        report.failed.len()
    );
    Ok(())
}
