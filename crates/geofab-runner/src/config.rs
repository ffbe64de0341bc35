//! Instruction documents.
//!
//! An instruction file is a YAML document with five sections:
//!
//! - `output` - CRS and the grid resolution (required)
//! - `general` - which LiDAR classes to keep and how to treat the coast
//! - `processing` - worker count and tile batch size
//! - `data_paths` - input documents and the cache directory
//! - `channel_bathymetry` - river pipeline parameters (river runs only)
//!
//! Unknown keys are rejected so a typo cannot silently fall back to a
//! default.

use crate::{Result, RunnerError};
use geofab_channel::{AlignParams, TransectParams};
use geofab_dem::{Crs, DenseDemParams, DEFAULT_HORIZONTAL_EPSG, DEFAULT_VERTICAL_EPSG, GROUND, VEGETATION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Extra distance added around the channel when sampling and clipping, in metres.
pub const CHANNEL_BUFFER: f64 = 50.0;

/// A complete set of pipeline instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Instructions {
    pub output: OutputInstructions,
    #[serde(default)]
    pub general: GeneralInstructions,
    #[serde(default)]
    pub processing: ProcessingInstructions,
    pub data_paths: DataPaths,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_bathymetry: Option<ChannelBathymetryInstructions>,
}

/// Output grid definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputInstructions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<CrsInstructions>,
    #[serde(default)]
    pub grid_params: GridParams,
}

/// Horizontal and vertical EPSG codes; each defaults independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrsInstructions {
    #[serde(default = "default_horizontal")]
    pub horizontal: u32,
    #[serde(default = "default_vertical")]
    pub vertical: u32,
}

fn default_horizontal() -> u32 {
    DEFAULT_HORIZONTAL_EPSG
}

fn default_vertical() -> u32 {
    DEFAULT_VERTICAL_EPSG
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridParams {
    /// Output cell size in horizontal CRS units.
    pub resolution: Option<f64>,
}

/// Data selection and coastline handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralInstructions {
    /// Clamp background raster values in the foreshore to at most zero.
    pub set_dem_shoreline: bool,
    /// Contour attribute holding depth; the geometry Z when absent.
    pub bathymetry_contours_z_label: Option<String>,
    /// Drop LiDAR returns seaward of the foreshore.
    pub drop_offshore_lidar: bool,
    /// ASPRS classification codes to rasterise.
    pub lidar_classifications_to_keep: Vec<u8>,
    /// Fill remaining gaps once every source has been applied.
    pub interpolate_missing_values: bool,
}

impl Default for GeneralInstructions {
    fn default() -> Self {
        Self {
            set_dem_shoreline: true,
            bathymetry_contours_z_label: None,
            drop_offshore_lidar: true,
            lidar_classifications_to_keep: vec![GROUND],
            interpolate_missing_values: true,
        }
    }
}

/// Parallelism of tile rasterisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingInstructions {
    pub number_of_cores: usize,
    /// Tiles per batch; all tiles in one batch when absent.
    pub chunk_size: Option<usize>,
}

impl Default for ProcessingInstructions {
    fn default() -> Self {
        Self {
            number_of_cores: 1,
            chunk_size: None,
        }
    }
}

/// Input documents and the cache directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataPaths {
    /// Directory for stage artifacts and run metadata.
    pub local_cache: PathBuf,
    /// Catchment boundary polygon (required by the DEM pipeline).
    #[serde(default)]
    pub catchment_boundary: Option<PathBuf>,
    /// Land polygon; the whole catchment is land when absent.
    #[serde(default)]
    pub land: Option<PathBuf>,
    /// Point-cloud tiles.
    #[serde(default)]
    pub lidar_tiles: Vec<PathBuf>,
    /// Background GeoTIFF; at most one is supported.
    #[serde(default)]
    pub reference_dems: Vec<PathBuf>,
    /// Ocean depth contours.
    #[serde(default)]
    pub bathymetry_contours: Option<PathBuf>,
    /// River bed elevations with the polygons they apply within.
    #[serde(default)]
    pub river_bathymetry: Vec<PathBuf>,
}

/// Parameters of the river bathymetry pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelBathymetryInstructions {
    /// Reach the main channel starts from (the river mouth).
    pub channel_rec_id: i64,
    /// Smallest upstream area followed when tracing the main stem.
    pub channel_area_threshold: f64,
    /// River network document.
    pub rec_file: PathBuf,
    /// Flow and roughness table.
    pub flow_file: PathBuf,
    /// Spacing of cross-sections along the channel.
    pub transect_spacing: f64,
    pub min_channel_width: f64,
    pub max_channel_width: f64,
    /// How far the network may sit from the channel seen in the DEM.
    pub rec_alignment_tolerance: f64,
    /// Height above the bed below which a transect sample is in the channel.
    pub bank_threshold: f64,
    /// Centreline smoothing window in multiples of the mean width.
    pub width_centre_smoothing: f64,
    /// Highest accepted bank height when measuring widths.
    pub max_bank_height: f64,
    #[serde(default = "default_vegetation")]
    pub veg_lidar_classifications_to_keep: Vec<u8>,
}

/// Ground plus vegetation, so open ground keeps its ground elevation.
fn default_vegetation() -> Vec<u8> {
    std::iter::once(GROUND).chain(VEGETATION).collect()
}

impl ChannelBathymetryInstructions {
    /// Half-width of the corridor the channel DEMs are generated over.
    pub fn corridor_radius(&self) -> f64 {
        self.max_channel_width / 2.0 + self.rec_alignment_tolerance + CHANNEL_BUFFER
    }

    /// Transect parameters for aligning the network to the DEM.
    pub fn alignment_params(&self, resolution: f64) -> AlignParams {
        AlignParams {
            transect: TransectParams {
                sample_spacing: resolution,
                radius: self.corridor_radius(),
                search_radius: self.rec_alignment_tolerance,
                threshold: self.bank_threshold,
                min_channel_width: self.min_channel_width,
                max_bank_height: None,
            },
            width_centre_smoothing: self.width_centre_smoothing,
        }
    }

    /// Transect parameters for measuring the aligned channel.
    pub fn characteristics_params(&self, resolution: f64) -> TransectParams {
        TransectParams {
            sample_spacing: resolution,
            radius: self.max_channel_width / 2.0 + CHANNEL_BUFFER,
            search_radius: self.rec_alignment_tolerance,
            threshold: self.bank_threshold,
            min_channel_width: self.min_channel_width,
            max_bank_height: Some(self.max_bank_height),
        }
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("transect_spacing", self.transect_spacing),
            ("max_channel_width", self.max_channel_width),
            ("bank_threshold", self.bank_threshold),
        ];
        for (key, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(RunnerError::Config(format!(
                    "channel_bathymetry.{key} must be positive, got {value}"
                )));
            }
        }
        if !(self.min_channel_width >= 0.0 && self.min_channel_width <= self.max_channel_width) {
            return Err(RunnerError::Config(format!(
                "channel_bathymetry.min_channel_width ({}) must lie between 0 and max_channel_width ({})",
                self.min_channel_width, self.max_channel_width
            )));
        }
        if !(self.rec_alignment_tolerance >= 0.0) {
            return Err(RunnerError::Config(format!(
                "channel_bathymetry.rec_alignment_tolerance must not be negative, got {}",
                self.rec_alignment_tolerance
            )));
        }
        Ok(())
    }
}

impl Instructions {
    /// Parse and validate an instruction document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let instructions: Self = serde_yaml::from_str(yaml)?;
        instructions.validate()?;
        Ok(instructions)
    }

    /// Read, parse and validate an instruction file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| RunnerError::Input {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Check everything that can be checked before any computation.
    pub fn validate(&self) -> Result<()> {
        match self.output.grid_params.resolution {
            None => {
                return Err(RunnerError::Config(
                    "output.grid_params.resolution is required".into(),
                ))
            }
            Some(r) if !(r.is_finite() && r > 0.0) => {
                return Err(RunnerError::Config(format!(
                    "output.grid_params.resolution must be positive, got {r}"
                )))
            }
            Some(_) => {}
        }
        if self.processing.number_of_cores == 0 {
            return Err(RunnerError::Config(
                "processing.number_of_cores must be at least 1".into(),
            ));
        }
        if self.processing.chunk_size == Some(0) {
            return Err(RunnerError::Config(
                "processing.chunk_size must be at least 1".into(),
            ));
        }
        if self.data_paths.reference_dems.len() > 1 {
            return Err(RunnerError::Config(format!(
                "{} reference_dems given; only one is supported",
                self.data_paths.reference_dems.len()
            )));
        }
        if let Some(channel) = &self.channel_bathymetry {
            channel.validate()?;
        }
        if self.output.crs.is_none() {
            let crs = Crs::default();
            warn!(
                horizontal = crs.horizontal,
                vertical = crs.vertical,
                "No output CRS given; using the defaults"
            );
        }
        Ok(())
    }

    /// Output cell size. Validated instructions always have one.
    pub fn resolution(&self) -> Result<f64> {
        self.output
            .grid_params
            .resolution
            .ok_or_else(|| RunnerError::Config("output.grid_params.resolution is required".into()))
    }

    /// Output coordinate reference pair.
    pub fn crs(&self) -> Crs {
        self.output
            .crs
            .map(|c| Crs {
                horizontal: c.horizontal,
                vertical: c.vertical,
            })
            .unwrap_or_default()
    }

    /// Dense DEM parameters from the general and processing sections.
    pub fn dense_dem_params(&self) -> DenseDemParams {
        DenseDemParams {
            interpolate_missing_values: self.general.interpolate_missing_values,
            drop_offshore_lidar: self.general.drop_offshore_lidar,
            classifications_to_keep: self.general.lidar_classifications_to_keep.clone(),
            number_of_cores: self.processing.number_of_cores,
            chunk_size: self.processing.chunk_size,
            ..DenseDemParams::default()
        }
    }

    /// The river pipeline section, required by river runs.
    pub fn channel_bathymetry(&self) -> Result<&ChannelBathymetryInstructions> {
        self.channel_bathymetry
            .as_ref()
            .ok_or_else(|| RunnerError::Config("channel_bathymetry section is required for river runs".into()))
    }
}
