//! `geofab` command-line interface.

use clap::{Args, Parser, Subcommand};
use geofab_dem::CellSource;
use geofab_runner::{run_dem, run_river, Instructions, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Hydrologically conditioned DEMs and river bathymetry from LiDAR.
#[derive(Parser)]
#[command(name = "geofab")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hydrologically conditioned DEM generation", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a DEM for the catchment
    Dem(InstructionArgs),
    /// Estimate river bathymetry along the main channel
    River(InstructionArgs),
    /// Parse and validate an instruction file without running it
    Validate(InstructionArgs),
}

#[derive(Args)]
struct InstructionArgs {
    /// Path to the YAML instruction file
    #[arg(short, long)]
    instructions: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Dem(args) => {
            let instructions = Instructions::from_file(&args.instructions)?;
            let outputs = run_dem(&instructions)?;
            let dem = &outputs.dem;
            info!(
                width = dem.spec().width,
                height = dem.spec().height,
                lidar = dem.count_source(CellSource::Lidar),
                no_data = dem.no_data_count(),
                fingerprint = outputs.fingerprint.short(),
                "DEM ready"
            );
        }
        Commands::River(args) => {
            let instructions = Instructions::from_file(&args.instructions)?;
            let outputs = run_river(&instructions)?;
            info!(
                estimates = outputs.bed_elevations.len(),
                fan = outputs.fan.is_some(),
                points = outputs.bathymetry.points.len(),
                "River bathymetry ready"
            );
        }
        Commands::Validate(args) => {
            Instructions::from_file(&args.instructions)?;
            info!(path = %args.instructions.display(), "Instructions are valid");
        }
    }
    Ok(())
}
