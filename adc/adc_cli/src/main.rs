use clap::{Parser, Subcommand};

mod commands;
mod integration;

use commands::app::{execute_run_app, RunAppArgs};
use commands::boot::{execute_boot, BootArgs};
use commands::inspect::{execute_inspect, InspectArgs};
use commands::preset::{execute_create_preset, CreatePresetArgs};

/// ADC Command Line Interface
///
/// Scaffolds, inspects, boots and runs modules of the ADC kernel.
#[derive(Parser)]
#[clap(name = "adc", author, version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new preset skeleton
    #[clap(name = "create-preset")]
    CreatePreset(CreatePresetArgs),

    /// Boot a manifest and report which modules came up
    Boot(BootArgs),

    /// Boot an app's dependencies and run it
    #[clap(name = "run-app")]
    RunApp(RunAppArgs),

    /// List installed modules
    Inspect(InspectArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::CreatePreset(args) => execute_create_preset(args).await,
        Commands::Boot(args) => execute_boot(args).await,
        Commands::RunApp(args) => execute_run_app(args).await,
        Commands::Inspect(args) => execute_inspect(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
