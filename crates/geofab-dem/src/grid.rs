//! Elevation grid representation.

use crate::{DemError, Result};
use geo::{coord, Coord, Rect};
use serde::{Deserialize, Serialize};

/// Layout of a north-up raster: origin, cell size and dimensions.
///
/// Row 0 is the northern edge, columns increase eastward, matching the
/// GeoTIFF convention used by the background raster reader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Western edge of the grid.
    pub x_min: f64,
    /// Northern edge of the grid.
    pub y_max: f64,
    /// Cell size in horizontal CRS units.
    pub resolution: f64,
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
}

/// Tolerance used when snapping coordinates onto cell edges.
const EDGE_TOLERANCE: f64 = 1e-9;

impl GridSpec {
    /// Create the smallest resolution-aligned grid covering `bounds`.
    pub fn covering(bounds: Rect<f64>, resolution: f64) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(DemError::InvalidResolution(resolution));
        }

        let x_min = (bounds.min().x / resolution).floor() * resolution;
        let y_max = (bounds.max().y / resolution).ceil() * resolution;
        let width = ((bounds.max().x - x_min) / resolution - EDGE_TOLERANCE)
            .ceil()
            .max(1.0) as usize;
        let height = ((y_max - bounds.min().y) / resolution - EDGE_TOLERANCE)
            .ceil()
            .max(1.0) as usize;

        Ok(Self {
            x_min,
            y_max,
            resolution,
            width,
            height,
        })
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    /// True if the grid has no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Eastern edge of the grid.
    pub fn x_max(&self) -> f64 {
        self.x_min + self.width as f64 * self.resolution
    }

    /// Southern edge of the grid.
    pub fn y_min(&self) -> f64 {
        self.y_max - self.height as f64 * self.resolution
    }

    /// Bounding rectangle of the whole grid.
    pub fn bounds(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.x_min, y: self.y_min() },
            coord! { x: self.x_max(), y: self.y_max },
        )
    }

    /// Flat index of a (row, col) pair.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    /// (row, col) pair of a flat index.
    pub fn row_col(&self, index: usize) -> (usize, usize) {
        (index / self.width, index % self.width)
    }

    /// Centre coordinate of a cell.
    pub fn cell_centre(&self, row: usize, col: usize) -> Coord<f64> {
        coord! {
            x: self.x_min + (col as f64 + 0.5) * self.resolution,
            y: self.y_max - (row as f64 + 0.5) * self.resolution,
        }
    }

    /// Footprint rectangle of a cell.
    pub fn cell_rect(&self, row: usize, col: usize) -> Rect<f64> {
        let x0 = self.x_min + col as f64 * self.resolution;
        let y1 = self.y_max - row as f64 * self.resolution;
        Rect::new(
            coord! { x: x0, y: y1 - self.resolution },
            coord! { x: x0 + self.resolution, y: y1 },
        )
    }

    /// Cell containing a coordinate, if it falls on the grid.
    ///
    /// Points exactly on the eastern or southern edge belong to the last
    /// column or row.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let fx = (x - self.x_min) / self.resolution;
        let fy = (self.y_max - y) / self.resolution;
        if !(fx.is_finite() && fy.is_finite()) || fx < -EDGE_TOLERANCE || fy < -EDGE_TOLERANCE {
            return None;
        }

        let mut col = fx.max(0.0).floor() as usize;
        let mut row = fy.max(0.0).floor() as usize;
        if col == self.width && fx <= self.width as f64 + EDGE_TOLERANCE {
            col -= 1;
        }
        if row == self.height && fy <= self.height as f64 + EDGE_TOLERANCE {
            row -= 1;
        }
        (row < self.height && col < self.width).then_some((row, col))
    }
}

/// Where the value of a cell came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellSource {
    /// No value.
    NoData,
    /// Rasterised directly from point-cloud returns.
    Lidar,
    /// IDW-filled gap inside the measured extent.
    GapFill,
    /// Patched from a background raster.
    Reference,
    /// Interpolated from ocean depth contours.
    Ocean,
    /// Interpolated from estimated river-bed elevations.
    River,
    /// Filled by the final missing-value interpolation.
    Filled,
}

/// A raster of elevations with a per-cell provenance layer.
///
/// Missing values are stored as NaN. Grids are treated as immutable
/// snapshots once assembled: interpolation stages clone the grid they are
/// given and return the modified copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevationGrid {
    spec: GridSpec,
    #[serde(with = "nan_as_null")]
    values: Vec<f64>,
    sources: Vec<CellSource>,
}

impl ElevationGrid {
    /// Create a grid with every cell set to no data.
    pub fn empty(spec: GridSpec) -> Self {
        Self {
            spec,
            values: vec![f64::NAN; spec.len()],
            sources: vec![CellSource::NoData; spec.len()],
        }
    }

    /// Create a grid from row-major values, tagging every finite value with `source`.
    pub fn from_values(spec: GridSpec, values: Vec<f64>, source: CellSource) -> Result<Self> {
        if values.len() != spec.len() {
            return Err(DemError::GridMismatch {
                expected_width: spec.width,
                expected_height: spec.height,
                width: values.len(),
                height: 1,
            });
        }
        let sources = values
            .iter()
            .map(|v| if v.is_finite() { source } else { CellSource::NoData })
            .collect();
        Ok(Self {
            spec,
            values,
            sources,
        })
    }

    /// Grid layout.
    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// Row-major elevation values (NaN for no data).
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Row-major provenance layer.
    pub fn sources(&self) -> &[CellSource] {
        &self.sources
    }

    /// Value at a flat index, `None` for no data.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().filter(|v| v.is_finite())
    }

    /// Provenance at a flat index.
    pub fn source(&self, index: usize) -> CellSource {
        self.sources[index]
    }

    /// Set a cell's value and provenance.
    pub fn set(&mut self, index: usize, value: f64, source: CellSource) {
        if value.is_finite() {
            self.values[index] = value;
            self.sources[index] = source;
        } else {
            self.values[index] = f64::NAN;
            self.sources[index] = CellSource::NoData;
        }
    }

    /// Nearest-cell elevation at a coordinate.
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let (row, col) = self.spec.cell_of(x, y)?;
        self.get(self.spec.index(row, col))
    }

    /// Number of no-data cells.
    pub fn no_data_count(&self) -> usize {
        self.values.iter().filter(|v| !v.is_finite()).count()
    }

    /// Number of cells with the given provenance.
    pub fn count_source(&self, source: CellSource) -> usize {
        self.sources.iter().filter(|s| **s == source).count()
    }

    /// Iterate `(index, centre)` over every cell.
    pub fn cell_centres(&self) -> impl Iterator<Item = (usize, Coord<f64>)> + '_ {
        (0..self.spec.len()).map(move |i| {
            let (row, col) = self.spec.row_col(i);
            (i, self.spec.cell_centre(row, col))
        })
    }
}

/// Serialises NaN as JSON `null` so grids survive a round trip through JSON.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        values
            .iter()
            .map(|v| v.is_finite().then_some(*v))
            .collect::<Vec<Option<f64>>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}
