//! Point-cloud tiles and their rasterisation onto the output grid.

use crate::grid::{GridSpec, ElevationGrid, CellSource};
use crate::region::covers;
use crate::Result;
use geo::{coord, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// ASPRS classification code for ground returns.
pub const GROUND: u8 = 2;
/// ASPRS classification codes for low, medium and high vegetation.
pub const VEGETATION: [u8; 3] = [3, 4, 5];

/// A single classified point-cloud return.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LidarPoint {
    /// Easting.
    pub x: f64,
    /// Northing.
    pub y: f64,
    /// Elevation.
    pub z: f64,
    /// ASPRS classification code.
    pub classification: u8,
}

/// A spatially bounded set of points held in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloudTile {
    /// Identifier used in log messages and errors.
    pub name: String,
    /// Unordered returns.
    pub points: Vec<LidarPoint>,
}

/// Something that can produce the points of one tile.
///
/// Tiles are read inside the rasterisation workers, so reading may be
/// expensive and may fail; a failure aborts the whole batch before any
/// result is published.
pub trait TileSource: Sync {
    /// Name used in log messages and errors.
    fn name(&self) -> &str;

    /// Read the tile's points.
    fn read_points(&self) -> Result<Cow<'_, [LidarPoint]>>;
}

impl TileSource for PointCloudTile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_points(&self) -> Result<Cow<'_, [LidarPoint]>> {
        Ok(Cow::Borrowed(&self.points))
    }
}

/// Which points of a tile to rasterise.
#[derive(Debug, Clone)]
pub struct PointFilter<'a> {
    /// Classification codes to keep.
    pub classifications: &'a [u8],
    /// Region points must fall in.
    pub region: &'a MultiPolygon<f64>,
}

impl PointFilter<'_> {
    fn keeps(&self, point: &LidarPoint) -> bool {
        self.classifications.contains(&point.classification)
            && point.z.is_finite()
            && covers(self.region, coord! { x: point.x, y: point.y })
    }
}

/// Per-cell sums of one tile, plus the footprint of the cells it touched.
#[derive(Debug, Clone, Default)]
pub struct TileRaster {
    /// Flat cell index to (sum of z, number of points).
    pub cells: BTreeMap<usize, (f64, u32)>,
    /// Cell-aligned bounding rectangle of the kept points.
    pub footprint: Option<Rect<f64>>,
}

/// Bin the kept points of a tile into grid cells.
pub fn rasterize_tile<T: TileSource + ?Sized>(
    tile: &T,
    spec: &GridSpec,
    filter: &PointFilter<'_>,
) -> Result<TileRaster> {
    let points = tile.read_points()?;
    let mut raster = TileRaster::default();
    let mut row_range = (usize::MAX, 0usize);
    let mut col_range = (usize::MAX, 0usize);

    for point in points.iter().filter(|p| filter.keeps(p)) {
        let Some((row, col)) = spec.cell_of(point.x, point.y) else {
            continue;
        };
        let entry = raster.cells.entry(spec.index(row, col)).or_insert((0.0, 0));
        entry.0 += point.z;
        entry.1 += 1;
        row_range = (row_range.0.min(row), row_range.1.max(row));
        col_range = (col_range.0.min(col), col_range.1.max(col));
    }

    if !raster.cells.is_empty() {
        let top_left = spec.cell_rect(row_range.0, col_range.0);
        let bottom_right = spec.cell_rect(row_range.1, col_range.1);
        raster.footprint = Some(Rect::new(
            coord! { x: top_left.min().x, y: bottom_right.min().y },
            coord! { x: bottom_right.max().x, y: top_left.max().y },
        ));
    }

    Ok(raster)
}

/// Running per-cell sums across tiles.
///
/// Tiles are merged one at a time in tile order, so the floating-point
/// sums are identical however the tiles were rasterised.
#[derive(Debug, Clone)]
pub struct CellAccumulator {
    spec: GridSpec,
    sums: Vec<f64>,
    counts: Vec<u32>,
    footprints: Vec<Rect<f64>>,
}

impl CellAccumulator {
    /// Create an accumulator for a grid.
    pub fn new(spec: GridSpec) -> Self {
        Self {
            spec,
            sums: vec![0.0; spec.len()],
            counts: vec![0; spec.len()],
            footprints: Vec::new(),
        }
    }

    /// Fold one tile's raster in.
    pub fn merge(&mut self, raster: TileRaster) {
        for (index, (sum, count)) in raster.cells {
            self.sums[index] += sum;
            self.counts[index] += count;
        }
        self.footprints.extend(raster.footprint);
    }

    /// Footprints of every tile that contributed points, in merge order.
    pub fn footprints(&self) -> &[Rect<f64>] {
        &self.footprints
    }

    /// Mean elevation per cell; cells without points are no data.
    pub fn into_grid(self) -> ElevationGrid {
        let mut grid = ElevationGrid::empty(self.spec);
        for (index, (sum, count)) in self.sums.into_iter().zip(self.counts).enumerate() {
            if count > 0 {
                grid.set(index, sum / count as f64, CellSource::Lidar);
            }
        }
        grid
    }
}
