//! # geofab-runner
//!
//! Instruction-driven pipelines over [`geofab_dem`] and [`geofab_channel`].
//!
//! An [`Instructions`] document names the output grid, the input files and
//! a cache directory. Two pipelines read it:
//!
//! - [`run_dem`] builds a hydrologically conditioned DEM for the catchment
//! - [`run_river`] estimates river bed elevations along a main channel and
//!   publishes them as a river bathymetry document that a later DEM run
//!   can list under `data_paths.river_bathymetry`
//!
//! Every stage result is kept in a [`StageCache`] under the cache
//! directory, so an interrupted or repeated run resumes from the last stage
//! whose inputs are unchanged. Each run also writes `metadata.json` with
//! the instructions and the stages it ran or reused.
//!
//! ## Example
//!
//! ```no_run
//! use geofab_runner::{run_dem, Instructions};
//!
//! let instructions = Instructions::from_file("instructions.yaml")?;
//! let outputs = run_dem(&instructions)?;
//! println!("{} cells without data", outputs.dem.no_data_count());
//! # Ok::<(), geofab_runner::RunnerError>(())
//! ```

pub mod config;
mod error;
pub mod metadata;
pub mod processor;
pub mod stage_cache;
pub mod store;

pub use config::{
    ChannelBathymetryInstructions, CrsInstructions, DataPaths, GeneralInstructions, GridParams, Instructions,
    OutputInstructions, ProcessingInstructions, CHANNEL_BUFFER,
};
pub use error::RunnerError;
pub use metadata::{Pipeline, RunMetadata, METADATA_DOCUMENT};
pub use processor::{
    DemGenerator, DemOutputs, RiverBathymetryGenerator, RiverOutputs, StudyArea, RIVER_BATHYMETRY_DOCUMENT,
};
pub use stage_cache::{Fingerprint, FingerprintBuilder, StageCache, StageRecord};

use tracing::info;

/// Result type for pipeline runs.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Build the DEM described by the instructions.
///
/// Stage results are cached under `data_paths.local_cache`.
pub fn run_dem(instructions: &Instructions) -> Result<DemOutputs> {
    instructions.validate()?;
    let mut cache = StageCache::on_disk(&instructions.data_paths.local_cache)?;
    let outputs = DemGenerator::new(instructions)?.run(&mut cache)?;
    finish(Pipeline::Dem, instructions, &cache)?;
    Ok(outputs)
}

/// Estimate river bathymetry along the channel described by the instructions.
///
/// Stage results and the published `river_bathymetry_points.json` are
/// written under `data_paths.local_cache`.
pub fn run_river(instructions: &Instructions) -> Result<RiverOutputs> {
    instructions.validate()?;
    let mut cache = StageCache::on_disk(&instructions.data_paths.local_cache)?;
    let outputs = RiverBathymetryGenerator::new(instructions)?.run(&mut cache)?;
    finish(Pipeline::River, instructions, &cache)?;
    Ok(outputs)
}

fn finish(pipeline: Pipeline, instructions: &Instructions, cache: &StageCache) -> Result<()> {
    let metadata = RunMetadata::new(pipeline, instructions, cache);
    metadata.write(cache)?;
    info!(
        pipeline = ?pipeline,
        stages = metadata.stages.len(),
        reused = metadata.reused_stages(),
        "Run complete"
    );
    Ok(())
}
