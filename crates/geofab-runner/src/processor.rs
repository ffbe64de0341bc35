//! The DEM and river bathymetry pipelines.
//!
//! Each pipeline is a chain of stages run through a [`StageCache`]. A
//! stage's fingerprint covers its parameters, its input files and the
//! fingerprints of the stages it consumes, so a rerun only repeats the
//! stages whose inputs changed.
//!
//! # DEM stages
//!
//! 1. `dense_dem` - rasterise the LiDAR tiles and record the measured extent
//! 2. `result_dem` - add the background raster and offshore contours where
//!    LiDAR coverage falls short, interpolate river bathymetry, then fill
//!    remaining gaps
//!
//! # River stages
//!
//! `rec_channel`, `rec_channel_smoothed`, `channel_catchment`, the ground
//! and vegetation DEMs over the corridor (`channel_*` and `channel_veg_*`),
//! `aligned_channel`, `river_characteristics`, `river_bathymetry` and
//! `fan`. A failure in a late stage leaves the earlier artifacts in place.

use crate::config::Instructions;
use crate::stage_cache::{Fingerprint, StageCache};
use crate::store::{load_area, load_contours, load_flow_table, load_network, load_river_bathymetry, JsonTile};
use crate::{Result, RunnerError};
use geo::{LineString, MultiPolygon};
use geofab_channel::{
    align_channel, estimate_bed_elevations, estimate_width_and_slope, mouth_estimate, AlignedChannel,
    BedElevationEstimate, Channel, ChannelCharacteristics, FanParams, RiverMouthFan, MOUTH_SEARCH_SAMPLES,
};
use geofab_dem::{
    CatchmentGeometry, CoveragePolicy, DenseDem, DenseDemParams, ElevationGrid, ReferenceDem,
    RiverBathymetryPoints, DEFAULT_FORESHORE_BUFFER,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Name of the published river bathymetry document.
pub const RIVER_BATHYMETRY_DOCUMENT: &str = "river_bathymetry_points.json";

/// The catchment a DEM is generated over, and its land.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyArea {
    pub catchment: MultiPolygon<f64>,
    /// The whole catchment is land when absent.
    pub land: Option<MultiPolygon<f64>>,
}

impl StudyArea {
    /// Load the catchment and land named in the instructions.
    pub fn from_instructions(instructions: &Instructions) -> Result<Self> {
        let path = instructions
            .data_paths
            .catchment_boundary
            .as_deref()
            .ok_or_else(|| RunnerError::Config("data_paths.catchment_boundary is required".into()))?;
        Ok(Self {
            catchment: load_area(path)?,
            land: load_land(instructions)?,
        })
    }
}

fn load_land(instructions: &Instructions) -> Result<Option<MultiPolygon<f64>>> {
    instructions.data_paths.land.as_deref().map(load_area).transpose()
}

/// A finished DEM.
#[derive(Debug, Clone)]
pub struct DemOutputs {
    pub dem: ElevationGrid,
    /// Extent of the LiDAR-measured cells, before any other source.
    pub extents: Option<MultiPolygon<f64>>,
    /// Fingerprint of the final grid.
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Serialize, Deserialize)]
struct DenseStage {
    dem: ElevationGrid,
    extents: Option<MultiPolygon<f64>>,
}

/// Builds a hydrologically conditioned DEM from LiDAR plus optional
/// background raster, ocean contours and river bathymetry.
#[derive(Debug, Clone)]
pub struct DemGenerator<'a> {
    instructions: &'a Instructions,
    area: StudyArea,
    classifications: Vec<u8>,
    prefix: String,
    area_fingerprint: Option<Fingerprint>,
}

impl<'a> DemGenerator<'a> {
    /// A generator over the catchment named in the instructions.
    pub fn new(instructions: &'a Instructions) -> Result<Self> {
        Ok(Self::for_area(instructions, StudyArea::from_instructions(instructions)?, ""))
    }

    /// A generator over another area; stage names get `prefix`.
    pub fn for_area(instructions: &'a Instructions, area: StudyArea, prefix: &str) -> Self {
        Self {
            instructions,
            area,
            classifications: instructions.general.lidar_classifications_to_keep.clone(),
            prefix: prefix.to_string(),
            area_fingerprint: None,
        }
    }

    /// Identify the catchment by the stage that produced it rather than by
    /// its coordinates.
    pub fn with_area_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.area_fingerprint = Some(fingerprint);
        self
    }

    /// Rasterise these classification codes instead of the general ones.
    pub fn with_classifications(mut self, classifications: Vec<u8>) -> Self {
        self.classifications = classifications;
        self
    }

    fn stage(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn catchment_geometry(&self) -> Result<CatchmentGeometry> {
        let geometry = CatchmentGeometry::new(
            self.area.catchment.clone(),
            self.instructions.crs(),
            self.instructions.resolution()?,
            DEFAULT_FORESHORE_BUFFER,
        )?;
        Ok(match &self.area.land {
            Some(land) => geometry.with_land(land.clone()),
            None => geometry,
        })
    }

    fn dense_params(&self) -> DenseDemParams {
        DenseDemParams {
            classifications_to_keep: self.classifications.clone(),
            ..self.instructions.dense_dem_params()
        }
    }

    /// Run both DEM stages.
    pub fn run(&self, cache: &mut StageCache) -> Result<DemOutputs> {
        let geometry = self.catchment_geometry()?;
        let params = self.dense_params();
        let data_paths = &self.instructions.data_paths;
        let tiles: Vec<JsonTile> = data_paths.lidar_tiles.iter().map(JsonTile::new).collect();

        // The worker count and batch size do not change the grid
        let dense_stage = self.stage("dense_dem");
        let mut builder = match &self.area_fingerprint {
            Some(area) => Fingerprint::builder(&dense_stage)
                .input(area)
                .param("land", &self.area.land)?
                .param("crs", &geometry.crs())?
                .param("resolution", &geometry.resolution())?
                .param("foreshore_buffer", &geometry.foreshore_buffer())?,
            None => Fingerprint::builder(&dense_stage).param("geometry", &geometry)?,
        };
        builder = builder
            .param("drop_offshore_lidar", &params.drop_offshore_lidar)?
            .param("classifications", &params.classifications_to_keep)?
            .param("idw_power", &params.idw_power)?
            .param("idw_radius", &params.idw_radius)?;
        for tile in &tiles {
            builder = builder.file(tile.path())?;
        }
        let dense_fingerprint = builder.finish();

        let dense: DenseStage = cache.get_or_compute(&dense_stage, &dense_fingerprint, || {
            let mut dense = DenseDem::new(geometry.clone(), params.clone())?;
            dense.add_lidar(&tiles)?;
            let (dem, extents) = dense.into_parts();
            Ok(DenseStage { dem, extents })
        })?;
        if dense.extents.is_none() {
            warn!(stage = %dense_stage, "No LiDAR extent; the DEM relies on other sources");
        }

        let general = &self.instructions.general;
        let result_stage = self.stage("result_dem");
        let mut builder = Fingerprint::builder(&result_stage)
            .input(&dense_fingerprint)
            .param("set_dem_shoreline", &general.set_dem_shoreline)?
            .param("bathymetry_contours_z_label", &general.bathymetry_contours_z_label)?
            .param("interpolate_missing_values", &general.interpolate_missing_values)?;
        let supplementary = data_paths
            .reference_dems
            .iter()
            .chain(&data_paths.bathymetry_contours)
            .chain(&data_paths.river_bathymetry);
        for path in supplementary {
            builder = builder.file(path)?;
        }
        let result_fingerprint = builder.finish();

        let extents = dense.extents.clone();
        let dem: ElevationGrid = cache.get_or_compute(&result_stage, &result_fingerprint, || {
            let mut dem = DenseDem::from_parts(geometry, params, dense.dem, dense.extents)?;
            self.add_reference_dem(&mut dem)?;
            self.add_offshore(&mut dem)?;
            self.add_river_bathymetry(&mut dem)?;
            dem.interpolate_missing();
            Ok(dem.into_parts().0)
        })?;

        Ok(DemOutputs {
            dem,
            extents,
            fingerprint: result_fingerprint,
        })
    }

    fn add_reference_dem(&self, dem: &mut DenseDem) -> Result<()> {
        let Some(path) = self.instructions.data_paths.reference_dems.first() else {
            return Ok(());
        };
        let geometry = dem.catchment();
        let uncovered = geometry.land_and_foreshore_without_lidar(dem.extents());
        if !CoveragePolicy::default().needs_supplementary(geometry.land_and_foreshore(), &uncovered) {
            info!("LiDAR covers the land and foreshore; background DEM not needed");
            return Ok(());
        }
        info!(path = %path.display(), "Incorporating background DEM");
        let reference = ReferenceDem::from_geotiff(path)?;
        dem.add_reference_dem(&reference, self.instructions.general.set_dem_shoreline);
        Ok(())
    }

    fn add_offshore(&self, dem: &mut DenseDem) -> Result<()> {
        let Some(path) = &self.instructions.data_paths.bathymetry_contours else {
            return Ok(());
        };
        let geometry = dem.catchment();
        let uncovered = geometry.offshore_without_lidar(dem.extents());
        if !CoveragePolicy::default().needs_supplementary(geometry.offshore(), &uncovered) {
            info!("LiDAR covers the offshore region; bathymetry not needed");
            return Ok(());
        }
        info!(path = %path.display(), "Incorporating offshore bathymetry");
        let contours = load_contours(path, self.instructions.general.bathymetry_contours_z_label.clone())?;
        dem.interpolate_offshore(&contours)?;
        Ok(())
    }

    fn add_river_bathymetry(&self, dem: &mut DenseDem) -> Result<()> {
        let paths = &self.instructions.data_paths.river_bathymetry;
        if paths.is_empty() {
            return Ok(());
        }
        info!(files = paths.len(), "Incorporating river bathymetry");
        let river = load_river_bathymetry(paths)?;
        dem.interpolate_river_bathymetry(&river);
        Ok(())
    }
}

/// Everything the river pipeline produced.
#[derive(Debug, Clone)]
pub struct RiverOutputs {
    pub channel: Channel,
    pub aligned: AlignedChannel,
    pub characteristics: ChannelCharacteristics,
    pub bed_elevations: Vec<BedElevationEstimate>,
    /// Absent when no ocean contours were given.
    pub fan: Option<RiverMouthFan>,
    /// Bed elevations (Smart et al.) and fan depths with their polygons.
    pub bathymetry: RiverBathymetryPoints,
}

/// Estimates river bed elevations along a main channel and a fan out to
/// the ocean contours.
#[derive(Debug, Clone, Copy)]
pub struct RiverBathymetryGenerator<'a> {
    instructions: &'a Instructions,
}

impl<'a> RiverBathymetryGenerator<'a> {
    pub fn new(instructions: &'a Instructions) -> Result<Self> {
        instructions.channel_bathymetry()?;
        Ok(Self { instructions })
    }

    /// Run every river stage and publish the combined bathymetry.
    pub fn run(&self, cache: &mut StageCache) -> Result<RiverOutputs> {
        let params = self.instructions.channel_bathymetry()?;
        let resolution = self.instructions.resolution()?;

        let rec_fingerprint = Fingerprint::builder("rec_channel")
            .file(&params.rec_file)?
            .param("channel_rec_id", &params.channel_rec_id)?
            .param("channel_area_threshold", &params.channel_area_threshold)?
            .param("transect_spacing", &params.transect_spacing)?
            .finish();
        let channel: Channel = cache.get_or_compute("rec_channel", &rec_fingerprint, || {
            let network = load_network(&params.rec_file)?;
            Ok(Channel::from_rec(
                &network,
                params.channel_rec_id,
                params.transect_spacing,
                params.channel_area_threshold,
            )?)
        })?;

        let smoothed_fingerprint = Fingerprint::builder("rec_channel_smoothed")
            .input(&rec_fingerprint)
            .finish();
        let seed: LineString<f64> = cache.get_or_compute("rec_channel_smoothed", &smoothed_fingerprint, || {
            Ok(channel.get_sampled_spline_fit())
        })?;

        let corridor_radius = params.corridor_radius();
        let corridor_fingerprint = Fingerprint::builder("channel_catchment")
            .input(&rec_fingerprint)
            .param("corridor_radius", &corridor_radius)?
            .finish();
        let corridor: MultiPolygon<f64> = cache.get_or_compute("channel_catchment", &corridor_fingerprint, || {
            Ok(channel.get_channel_catchment(corridor_radius))
        })?;

        let land = load_land(self.instructions)?;
        let area = StudyArea {
            catchment: corridor,
            land,
        };
        info!("Generating ground DEM along the channel");
        let ground = DemGenerator::for_area(self.instructions, area.clone(), "channel_")
            .with_area_fingerprint(corridor_fingerprint.clone())
            .run(cache)?;
        info!("Generating vegetation DEM along the channel");
        let vegetation = DemGenerator::for_area(self.instructions, area, "channel_veg_")
            .with_area_fingerprint(corridor_fingerprint.clone())
            .with_classifications(params.veg_lidar_classifications_to_keep.clone())
            .run(cache)?;

        let align_params = params.alignment_params(resolution);
        let aligned_fingerprint = Fingerprint::builder("aligned_channel")
            .input(&smoothed_fingerprint)
            .input(&ground.fingerprint)
            .input(&vegetation.fingerprint)
            .param("params", &align_params)?
            .param("transect_spacing", &params.transect_spacing)?
            .finish();
        let aligned: AlignedChannel = cache.get_or_compute("aligned_channel", &aligned_fingerprint, || {
            Ok(align_channel(
                &seed,
                &ground.dem,
                Some(&vegetation.dem),
                params.transect_spacing,
                &align_params,
            )?)
        })?;

        let measure = params.characteristics_params(resolution);
        let characteristics_fingerprint = Fingerprint::builder("river_characteristics")
            .input(&aligned_fingerprint)
            .input(&ground.fingerprint)
            .input(&vegetation.fingerprint)
            .param("params", &measure)?
            .finish();
        let characteristics: ChannelCharacteristics =
            cache.get_or_compute("river_characteristics", &characteristics_fingerprint, || {
                Ok(estimate_width_and_slope(
                    &aligned.line,
                    &ground.dem,
                    Some(&vegetation.dem),
                    &measure,
                )?)
            })?;

        let bed_fingerprint = Fingerprint::builder("river_bathymetry")
            .input(&characteristics_fingerprint)
            .input(&rec_fingerprint)
            .file(&params.flow_file)?
            .finish();
        let bed_elevations: Vec<BedElevationEstimate> =
            cache.get_or_compute("river_bathymetry", &bed_fingerprint, || {
                let flows = load_flow_table(&params.flow_file)?;
                Ok(estimate_bed_elevations(&characteristics.samples, &channel, &flows)?)
            })?;

        let fan = self.fan(cache, &aligned, &aligned_fingerprint, &bed_elevations, &bed_fingerprint)?;

        let mut bathymetry = RiverBathymetryPoints {
            points: bed_elevations
                .iter()
                .map(|e| [e.point.x, e.point.y, e.bed_elevation_smart_et_al])
                .collect(),
            polygons: Vec::new(),
        };
        match &characteristics.river_polygon {
            Some(polygon) => bathymetry.polygons.push(polygon.clone()),
            None => warn!("No river polygon; bed elevations have nothing to apply within"),
        }
        if let Some(fan) = &fan {
            bathymetry.points.extend(fan.bathymetry.iter().copied());
            bathymetry.polygons.push(fan.polygon.clone());
        }
        if let Some(path) = cache.write_document(RIVER_BATHYMETRY_DOCUMENT, &bathymetry)? {
            info!(path = %path.display(), points = bathymetry.points.len(), "Published river bathymetry");
        }

        Ok(RiverOutputs {
            channel,
            aligned,
            characteristics,
            bed_elevations,
            fan,
            bathymetry,
        })
    }

    fn fan(
        &self,
        cache: &mut StageCache,
        aligned: &AlignedChannel,
        aligned_fingerprint: &Fingerprint,
        bed_elevations: &[BedElevationEstimate],
        bed_fingerprint: &Fingerprint,
    ) -> Result<Option<RiverMouthFan>> {
        let Some(path) = &self.instructions.data_paths.bathymetry_contours else {
            warn!("No bathymetry contours; skipping the river-mouth fan");
            return Ok(None);
        };
        if bed_elevations.is_empty() {
            return Err(RunnerError::EmptyStage {
                stage: "river_bathymetry".into(),
                reason: "no bed elevation estimates to start the fan from".into(),
            });
        }
        let spacing = self.instructions.channel_bathymetry()?.transect_spacing;
        let mouth = mouth_estimate(bed_elevations, MOUTH_SEARCH_SAMPLES * spacing)?;
        let z_label = self.instructions.general.bathymetry_contours_z_label.clone();
        let fan_params = FanParams::default();

        let fingerprint = Fingerprint::builder("fan")
            .input(aligned_fingerprint)
            .input(bed_fingerprint)
            .file(path)?
            .param("z_label", &z_label)?
            .param("params", &fan_params)?
            .finish();
        let fan = cache.get_or_compute("fan", &fingerprint, || {
            let contours = load_contours(path, z_label)?;
            Ok(RiverMouthFan::build(
                &aligned.line,
                mouth.bed_elevation_smart_et_al,
                mouth.width,
                &contours,
                spacing,
                &fan_params,
            )?)
        })?;
        Ok(Some(fan))
    }
}
