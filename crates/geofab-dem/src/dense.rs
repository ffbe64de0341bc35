//! Dense DEM assembly.
//!
//! [`DenseDem`] owns the elevation grid while it is being built. LiDAR
//! tiles are rasterised on a rayon pool, merged in tile order, and the
//! small gaps inside the measured extent are filled by IDW. Later stages
//! (background raster, bathymetry, final fill) each replace the grid with
//! a new snapshot.

use crate::bathymetry::{
    fill_missing, interpolate_offshore, interpolate_river_bathymetry, BathymetryContours,
    RiverBathymetryPoints,
};
use crate::grid::{CellSource, ElevationGrid};
use crate::idw::{fill_gaps_from_neighbours, IdwParams, IdwSearch, DEFAULT_IDW_POWER, DEFAULT_NEIGHBOURS};
use crate::lidar::{rasterize_tile, CellAccumulator, PointFilter, TileSource, GROUND};
use crate::reference::ReferenceDem;
use crate::region::{covers, union_all, CatchmentGeometry};
use crate::{DemError, Result};
use geo::{BooleanOps, MultiPolygon};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Parameters of dense DEM assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseDemParams {
    /// IDW distance exponent.
    pub idw_power: f64,
    /// Gap-fill search radius; `resolution * sqrt(2)` when `None`.
    pub idw_radius: Option<f64>,
    /// Whether [`DenseDem::interpolate_missing`] fills remaining gaps.
    pub interpolate_missing_values: bool,
    /// Drop points outside land and foreshore.
    pub drop_offshore_lidar: bool,
    /// Classification codes to keep.
    pub classifications_to_keep: Vec<u8>,
    /// Worker threads used for rasterisation.
    pub number_of_cores: usize,
    /// Tiles per batch; all tiles in one batch when `None`.
    pub chunk_size: Option<usize>,
}

impl Default for DenseDemParams {
    fn default() -> Self {
        Self {
            idw_power: DEFAULT_IDW_POWER,
            idw_radius: None,
            interpolate_missing_values: true,
            drop_offshore_lidar: true,
            classifications_to_keep: vec![GROUND],
            number_of_cores: 1,
            chunk_size: None,
        }
    }
}

/// A DEM under construction plus its measured extent.
#[derive(Debug, Clone)]
pub struct DenseDem {
    geometry: CatchmentGeometry,
    params: DenseDemParams,
    dem: ElevationGrid,
    extents: Option<MultiPolygon<f64>>,
}

impl DenseDem {
    /// Create an empty DEM over the catchment grid.
    pub fn new(geometry: CatchmentGeometry, params: DenseDemParams) -> Result<Self> {
        if params.number_of_cores == 0 {
            return Err(DemError::InvalidParallelism(params.number_of_cores));
        }
        let dem = ElevationGrid::empty(geometry.grid_spec()?);
        Ok(Self {
            geometry,
            params,
            dem,
            extents: None,
        })
    }

    /// Resume from a previously assembled grid and measured extent.
    ///
    /// The grid must have the layout the catchment would produce.
    pub fn from_parts(
        geometry: CatchmentGeometry,
        params: DenseDemParams,
        dem: ElevationGrid,
        extents: Option<MultiPolygon<f64>>,
    ) -> Result<Self> {
        let expected = geometry.grid_spec()?;
        let actual = *dem.spec();
        if expected != actual {
            return Err(DemError::GridMismatch {
                expected_width: expected.width,
                expected_height: expected.height,
                width: actual.width,
                height: actual.height,
            });
        }
        let mut resumed = Self::new(geometry, params)?;
        resumed.dem = dem;
        resumed.extents = extents;
        Ok(resumed)
    }

    /// The current grid snapshot.
    pub fn dem(&self) -> &ElevationGrid {
        &self.dem
    }

    /// Polygon of cells populated from LiDAR, `None` if no points were kept.
    pub fn extents(&self) -> Option<&MultiPolygon<f64>> {
        self.extents.as_ref()
    }

    /// The regions this DEM is built against.
    pub fn catchment(&self) -> &CatchmentGeometry {
        &self.geometry
    }

    /// Assembly parameters.
    pub fn params(&self) -> &DenseDemParams {
        &self.params
    }

    /// Consume the builder, returning the grid and the measured extent.
    pub fn into_parts(self) -> (ElevationGrid, Option<MultiPolygon<f64>>) {
        (self.dem, self.extents)
    }

    /// IDW radius used to fill gaps inside the measured extent.
    pub fn idw_radius(&self) -> f64 {
        self.params
            .idw_radius
            .unwrap_or(self.geometry.resolution() * std::f64::consts::SQRT_2)
    }

    fn scattered_params(&self) -> IdwParams {
        IdwParams {
            power: self.params.idw_power,
            search: IdwSearch::Nearest(DEFAULT_NEIGHBOURS),
        }
    }

    /// Rasterise point-cloud tiles and replace the grid with the result.
    ///
    /// Tiles are read and binned in parallel, then merged strictly in
    /// slice order so the grid is bit-identical for any worker count. The
    /// grid and extent are only replaced once every tile has been merged;
    /// a failing tile leaves the previous state untouched.
    pub fn add_lidar<T: TileSource>(&mut self, tiles: &[T]) -> Result<()> {
        let spec = *self.dem.spec();
        let region = if self.params.drop_offshore_lidar {
            self.geometry.land_and_foreshore()
        } else {
            self.geometry.catchment()
        };
        let filter = PointFilter {
            classifications: &self.params.classifications_to_keep,
            region,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.number_of_cores)
            .build()?;
        let chunk_size = self.params.chunk_size.unwrap_or(tiles.len()).max(1);

        info!(
            tiles = tiles.len(),
            cores = self.params.number_of_cores,
            chunk_size,
            "Rasterising LiDAR tiles"
        );

        let mut accumulator = CellAccumulator::new(spec);
        for (batch, chunk) in tiles.chunks(chunk_size).enumerate() {
            let rasters = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|tile| rasterize_tile(tile, &spec, &filter))
                    .collect::<Result<Vec<_>>>()
            })?;
            debug!(batch, tiles = chunk.len(), "Merging rasterised batch");
            for raster in rasters {
                accumulator.merge(raster);
            }
        }

        let footprints: Vec<MultiPolygon<f64>> = accumulator
            .footprints()
            .iter()
            .map(|rect| MultiPolygon::from(rect.to_polygon()))
            .collect();
        let extents = if footprints.is_empty() {
            warn!("No LiDAR points kept after filtering; measured extent is empty");
            None
        } else {
            Some(union_all(footprints).intersection(self.geometry.catchment()))
        };

        let mut dem = accumulator.into_grid();
        if let Some(extents) = &extents {
            let mask: Vec<bool> = dem.cell_centres().map(|(_, c)| covers(extents, c)).collect();
            let filled = fill_gaps_from_neighbours(&mut dem, &mask, self.idw_radius(), self.params.idw_power);
            debug!(cells = filled, "Filled gaps inside measured extent");
        }

        info!(
            lidar_cells = dem.count_source(CellSource::Lidar),
            no_data = dem.no_data_count(),
            "Dense DEM assembled from LiDAR"
        );
        self.dem = dem;
        self.extents = extents;
        Ok(())
    }

    /// Patch land and foreshore cells outside the measured extent from a
    /// background raster.
    ///
    /// The measured extent is left unchanged. With `set_foreshore`,
    /// patched foreshore values are clamped to at most zero.
    pub fn add_reference_dem(&mut self, reference: &ReferenceDem, set_foreshore: bool) {
        let region = self
            .geometry
            .land_and_foreshore_without_lidar(self.extents.as_ref());
        let foreshore = self.geometry.foreshore();
        let mut dem = self.dem.clone();
        let mut patched = 0usize;

        for (index, centre) in self.dem.cell_centres() {
            if self.dem.source(index) == CellSource::Lidar || !covers(&region, centre) {
                continue;
            }
            let Some(mut z) = reference.sample(centre.x, centre.y) else {
                continue;
            };
            if set_foreshore && z > 0.0 && covers(foreshore, centre) {
                z = 0.0;
            }
            dem.set(index, z, CellSource::Reference);
            patched += 1;
        }

        info!(cells = patched, "Patched DEM from background raster");
        self.dem = dem;
    }

    /// Fill offshore cells outside the measured extent from depth contours.
    pub fn interpolate_offshore(&mut self, contours: &BathymetryContours) -> Result<()> {
        self.dem = interpolate_offshore(
            &self.dem,
            &self.geometry,
            self.extents.as_ref(),
            contours,
            self.scattered_params(),
        )?;
        Ok(())
    }

    /// Replace cells inside river polygons with estimated bed elevations.
    pub fn interpolate_river_bathymetry(&mut self, river: &RiverBathymetryPoints) {
        self.dem = interpolate_river_bathymetry(
            &self.dem,
            self.extents.as_ref(),
            river,
            self.scattered_params(),
        );
    }

    /// Fill any remaining no-data cells inside the catchment, if enabled.
    pub fn interpolate_missing(&mut self) {
        if !self.params.interpolate_missing_values {
            debug!("Missing-value interpolation disabled");
            return;
        }
        let before = self.dem.no_data_count();
        self.dem = fill_missing(&self.dem, self.geometry.catchment(), self.scattered_params());
        info!(
            filled = before - self.dem.no_data_count(),
            "Interpolated remaining missing values"
        );
    }
}
