//! # geofab-dem
//!
//! Hydrologically conditioned DEM assembly for a catchment.
//!
//! This crate fuses irregularly sampled elevation sources into one gridded
//! surface:
//! - Airborne LiDAR ground returns, rasterised tile by tile
//! - An optional coarse background raster (GeoTIFF) for land not covered by LiDAR
//! - Ocean depth contours for the offshore region
//! - Estimated river-bed elevations inside river polygons
//!
//! ## Overview
//!
//! ### Regions
//!
//! [`CatchmentGeometry`] derives the land, foreshore and offshore regions
//! from a catchment boundary, a land polygon and the output resolution.
//! The foreshore is `foreshore_buffer` cells wide on the seaward side of
//! the coast. Whether a supplementary source is used at all is decided by
//! [`CoveragePolicy`]: only when more than 10% of the target region lies
//! outside the measured extent.
//!
//! ### Assembly
//!
//! [`DenseDem`] rasterises tiles on a rayon pool, merges them in tile
//! order (so the result does not depend on the worker count), fills small
//! gaps inside the measured extent by IDW with radius `resolution * sqrt(2)`,
//! and then layers the other sources on top. Cells rasterised from LiDAR
//! are never overwritten.
//!
//! ## Example
//!
//! ```no_run
//! use geofab_dem::{CatchmentGeometry, Crs, DenseDem, DenseDemParams, PointCloudTile};
//! use geo::{coord, Rect};
//!
//! let boundary = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 100.0, y: 100.0 }).to_polygon();
//! let geometry = CatchmentGeometry::new(boundary, Crs::default(), 1.0, 2)?;
//!
//! let tiles: Vec<PointCloudTile> = Vec::new();
//! let mut dem = DenseDem::new(geometry, DenseDemParams::default())?;
//! dem.add_lidar(&tiles)?;
//! dem.interpolate_missing();
//! println!("{} cells without data", dem.dem().no_data_count());
//! # Ok::<(), geofab_dem::DemError>(())
//! ```

mod bathymetry;
mod dense;
mod error;
mod grid;
mod idw;
mod lidar;
mod reference;
mod region;

pub use bathymetry::{
    fill_missing, interpolate_offshore, interpolate_river_bathymetry, BathymetryContours,
    DepthContour, RiverBathymetryPoints,
};
pub use dense::{DenseDem, DenseDemParams};
pub use error::DemError;
pub use grid::{CellSource, ElevationGrid, GridSpec};
pub use idw::{
    fill_gaps_from_neighbours, IdwInterpolator, IdwParams, IdwSearch, DEFAULT_IDW_POWER,
    DEFAULT_NEIGHBOURS,
};
pub use lidar::{
    rasterize_tile, CellAccumulator, LidarPoint, PointCloudTile, PointFilter, TileRaster,
    TileSource, GROUND, VEGETATION,
};
pub use reference::ReferenceDem;
pub use region::{
    buffer_line_string, buffer_polygon, covers, region_without, union_all, CatchmentGeometry,
    CoveragePolicy, Crs, DEFAULT_AREA_THRESHOLD, DEFAULT_FORESHORE_BUFFER, DEFAULT_HORIZONTAL_EPSG,
    DEFAULT_VERTICAL_EPSG,
};

/// Result type for DEM operations.
pub type Result<T> = std::result::Result<T, DemError>;
