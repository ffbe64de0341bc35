//! Catchment regions and the coverage policy phrased against them.
//!
//! Every spatial decision in the DEM pipeline (what gets gap-filled, what
//! is patched from a background raster, where bathymetry applies) is made
//! against one of the named regions derived here from the catchment
//! boundary, the land polygon and the output resolution.

use crate::grid::GridSpec;
use crate::{DemError, Result};
use geo::{
    Area, BooleanOps, BoundingRect, Coord, Intersects, Line, LineString, MultiPolygon, Point,
    Polygon,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Default horizontal EPSG code (NZTM2000).
pub const DEFAULT_HORIZONTAL_EPSG: u32 = 2193;
/// Default vertical EPSG code (NZVD2016).
pub const DEFAULT_VERTICAL_EPSG: u32 = 7839;
/// Default foreshore width in grid cells.
pub const DEFAULT_FORESHORE_BUFFER: u32 = 2;
/// Fraction of a region that must be uncovered before a supplementary
/// source is worth incorporating.
pub const DEFAULT_AREA_THRESHOLD: f64 = 0.10;

/// Horizontal and vertical coordinate reference pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs {
    /// Horizontal EPSG code.
    pub horizontal: u32,
    /// Vertical EPSG code.
    pub vertical: u32,
}

impl Default for Crs {
    fn default() -> Self {
        Self {
            horizontal: DEFAULT_HORIZONTAL_EPSG,
            vertical: DEFAULT_VERTICAL_EPSG,
        }
    }
}

/// The catchment boundary and the sub-regions derived from it.
///
/// The foreshore is a band `foreshore_buffer` cells wide on the seaward
/// side of the land polygon. `land`, `foreshore` and `offshore` tile the
/// catchment with disjoint interiors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchmentGeometry {
    catchment: MultiPolygon<f64>,
    land: MultiPolygon<f64>,
    foreshore: MultiPolygon<f64>,
    land_and_foreshore: MultiPolygon<f64>,
    offshore: MultiPolygon<f64>,
    crs: Crs,
    resolution: f64,
    foreshore_buffer: u32,
}

impl CatchmentGeometry {
    /// Create the regions for a catchment that is entirely land.
    pub fn new(
        catchment: impl Into<MultiPolygon<f64>>,
        crs: Crs,
        resolution: f64,
        foreshore_buffer: u32,
    ) -> Result<Self> {
        let catchment = catchment.into();
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(DemError::InvalidResolution(resolution));
        }
        if catchment.unsigned_area() <= 0.0 {
            return Err(DemError::EmptyCatchment);
        }

        let mut geometry = Self {
            land: catchment.clone(),
            foreshore: MultiPolygon::new(vec![]),
            land_and_foreshore: catchment.clone(),
            offshore: MultiPolygon::new(vec![]),
            catchment,
            crs,
            resolution,
            foreshore_buffer,
        };
        geometry.derive_regions();
        Ok(geometry)
    }

    /// Replace the land polygon and re-derive the foreshore and offshore.
    pub fn with_land(mut self, land: impl Into<MultiPolygon<f64>>) -> Self {
        self.land = land.into().intersection(&self.catchment);
        self.derive_regions();
        self
    }

    fn derive_regions(&mut self) {
        let width = self.foreshore_buffer as f64 * self.resolution;
        self.land_and_foreshore = buffer_polygon(&self.land, width).intersection(&self.catchment);
        self.foreshore = self.land_and_foreshore.difference(&self.land);
        self.offshore = self.catchment.difference(&self.land_and_foreshore);
    }

    /// The catchment boundary.
    pub fn catchment(&self) -> &MultiPolygon<f64> {
        &self.catchment
    }

    /// Land within the catchment.
    pub fn land(&self) -> &MultiPolygon<f64> {
        &self.land
    }

    /// The seaward band along the coast.
    pub fn foreshore(&self) -> &MultiPolygon<f64> {
        &self.foreshore
    }

    /// Land plus foreshore.
    pub fn land_and_foreshore(&self) -> &MultiPolygon<f64> {
        &self.land_and_foreshore
    }

    /// The catchment seaward of the foreshore.
    pub fn offshore(&self) -> &MultiPolygon<f64> {
        &self.offshore
    }

    /// Everything in the catchment that is not land.
    pub fn foreshore_and_offshore(&self) -> MultiPolygon<f64> {
        self.catchment.difference(&self.land)
    }

    /// Land and foreshore not covered by the measured extent.
    pub fn land_and_foreshore_without_lidar(
        &self,
        extents: Option<&MultiPolygon<f64>>,
    ) -> MultiPolygon<f64> {
        region_without(&self.land_and_foreshore, extents)
    }

    /// Offshore not covered by the measured extent.
    pub fn offshore_without_lidar(&self, extents: Option<&MultiPolygon<f64>>) -> MultiPolygon<f64> {
        region_without(&self.offshore, extents)
    }

    /// Coordinate reference pair of the output.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// Output cell size.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Foreshore width in cells.
    pub fn foreshore_buffer(&self) -> u32 {
        self.foreshore_buffer
    }

    /// Resolution-aligned grid covering the catchment.
    pub fn grid_spec(&self) -> Result<GridSpec> {
        let bounds = self
            .catchment
            .bounding_rect()
            .ok_or(DemError::EmptyCatchment)?;
        GridSpec::covering(bounds, self.resolution)
    }
}

/// `region − extents`; the whole region when there is no extent.
pub fn region_without(
    region: &MultiPolygon<f64>,
    extents: Option<&MultiPolygon<f64>>,
) -> MultiPolygon<f64> {
    match extents {
        Some(extents) if !extents.0.is_empty() => region.difference(extents),
        _ => region.clone(),
    }
}

/// True if a coordinate lies in (or on the boundary of) a region.
pub fn covers(region: &MultiPolygon<f64>, coord: Coord<f64>) -> bool {
    region.intersects(&Point::from(coord))
}

/// Decides whether a supplementary source is worth incorporating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoveragePolicy {
    /// Fraction of the target region that must be uncovered.
    pub area_threshold: f64,
}

impl Default for CoveragePolicy {
    fn default() -> Self {
        Self {
            area_threshold: DEFAULT_AREA_THRESHOLD,
        }
    }
}

impl CoveragePolicy {
    /// True if `uncovered_area` exceeds the threshold fraction of `region_area`.
    pub fn exceeds(&self, region_area: f64, uncovered_area: f64) -> bool {
        uncovered_area > region_area * self.area_threshold
    }

    /// Apply the policy to a region and its uncovered remainder.
    pub fn needs_supplementary(
        &self,
        region: &MultiPolygon<f64>,
        uncovered: &MultiPolygon<f64>,
    ) -> bool {
        self.exceeds(region.unsigned_area(), uncovered.unsigned_area())
    }
}

/// Union a list of polygons by pairwise reduction.
pub fn union_all(mut pieces: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    if pieces.is_empty() {
        return MultiPolygon::new(vec![]);
    }
    while pieces.len() > 1 {
        pieces = pieces
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => a.union(b),
                [a] => a.clone(),
                _ => MultiPolygon::new(vec![]),
            })
            .collect();
    }
    pieces.pop().unwrap_or_else(|| MultiPolygon::new(vec![]))
}

/// Grow a polygon outwards by `distance`.
///
/// Approximates the Minkowski sum with a rectangle along every edge and an
/// octagon at every vertex.
pub fn buffer_polygon(polygon: &MultiPolygon<f64>, distance: f64) -> MultiPolygon<f64> {
    if distance <= 0.0 {
        return polygon.clone();
    }
    let mut pieces = vec![polygon.clone()];
    for poly in polygon {
        for ring in std::iter::once(poly.exterior()).chain(poly.interiors()) {
            pieces.extend(line_string_pieces(ring, distance));
        }
    }
    union_all(pieces)
}

/// Corridor of half-width `distance` around a polyline.
pub fn buffer_line_string(line: &LineString<f64>, distance: f64) -> MultiPolygon<f64> {
    if distance <= 0.0 {
        return MultiPolygon::new(vec![]);
    }
    union_all(line_string_pieces(line, distance))
}

fn line_string_pieces(line: &LineString<f64>, distance: f64) -> Vec<MultiPolygon<f64>> {
    let mut pieces: Vec<MultiPolygon<f64>> = line
        .lines()
        .filter_map(|segment| segment_rectangle(segment, distance))
        .map(MultiPolygon::from)
        .collect();
    pieces.extend(line.coords().map(|c| MultiPolygon::from(octagon(*c, distance))));
    pieces
}

fn segment_rectangle(segment: Line<f64>, distance: f64) -> Option<Polygon<f64>> {
    let dx = segment.end.x - segment.start.x;
    let dy = segment.end.y - segment.start.y;
    let length = dx.hypot(dy);
    if length <= f64::EPSILON {
        return None;
    }
    let nx = -dy / length * distance;
    let ny = dx / length * distance;
    Some(Polygon::new(
        LineString::from(vec![
            (segment.start.x + nx, segment.start.y + ny),
            (segment.start.x - nx, segment.start.y - ny),
            (segment.end.x - nx, segment.end.y - ny),
            (segment.end.x + nx, segment.end.y + ny),
            (segment.start.x + nx, segment.start.y + ny),
        ]),
        vec![],
    ))
}

fn octagon(centre: Coord<f64>, radius: f64) -> Polygon<f64> {
    let mut ring: Vec<(f64, f64)> = (0..8)
        .map(|i| {
            let angle = PI / 8.0 + i as f64 * PI / 4.0;
            (centre.x + radius * angle.cos(), centre.y + radius * angle.sin())
        })
        .collect();
    ring.push(ring[0]);
    Polygon::new(LineString::from(ring), vec![])
}
