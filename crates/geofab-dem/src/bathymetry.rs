//! Scattered depth sources and their interpolation into the DEM.
//!
//! Each function here takes a finished grid snapshot and returns a new
//! grid; cells rasterised from LiDAR are never overwritten.

use crate::grid::{CellSource, ElevationGrid};
use crate::idw::{IdwInterpolator, IdwParams};
use crate::region::{covers, CatchmentGeometry};
use crate::{DemError, Result};
use geo::{coord, Coord, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// An ocean depth contour (or point set) with optional attributes.
///
/// Depths are positive down; the DEM stores elevations, so a contour of
/// depth 10 becomes an elevation of -10.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthContour {
    /// Vertices as `[x, y, z]`; z is the depth when no depth attribute is named.
    pub coords: Vec<[f64; 3]>,
    /// Numeric attributes keyed by name.
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
}

impl DepthContour {
    /// Depth of this contour using the named attribute, or the vertex z.
    pub fn depth_at(&self, vertex: usize, label: Option<&str>) -> Option<f64> {
        match label {
            Some(label) => self.attributes.get(label).copied(),
            None => self.coords.get(vertex).map(|c| c[2]),
        }
    }

    /// Uniform depth of the contour, if it has one.
    pub fn depth(&self, label: Option<&str>) -> Option<f64> {
        match label {
            Some(label) => self.attributes.get(label).copied(),
            None => self.coords.first().map(|c| c[2]),
        }
    }

    /// Planar geometry of the contour.
    pub fn line_string(&self) -> geo::LineString<f64> {
        self.coords
            .iter()
            .map(|c| coord! { x: c[0], y: c[1] })
            .collect::<Vec<Coord<f64>>>()
            .into()
    }
}

/// A collection of ocean depth contours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BathymetryContours {
    /// The contours.
    pub contours: Vec<DepthContour>,
    /// Name of the depth attribute; geometry z is used when absent.
    pub z_label: Option<String>,
}

impl BathymetryContours {
    /// Create a collection.
    pub fn new(contours: Vec<DepthContour>, z_label: Option<String>) -> Self {
        Self { contours, z_label }
    }

    /// Elevation samples (`[x, y, -depth]`) along every contour.
    ///
    /// Each vertex is a sample, and segments longer than `spacing` are
    /// densified every `spacing`.
    pub fn sample_points(&self, spacing: f64) -> Result<Vec<[f64; 3]>> {
        let label = self.z_label.as_deref();
        let mut samples = Vec::new();
        for (index, contour) in self.contours.iter().enumerate() {
            for (i, vertex) in contour.coords.iter().enumerate() {
                let depth = contour.depth_at(i, label).ok_or_else(|| {
                    DemError::MissingDepthAttribute {
                        index,
                        label: label.unwrap_or("z").to_string(),
                    }
                })?;
                samples.push([vertex[0], vertex[1], -depth]);

                let Some(next) = contour.coords.get(i + 1) else {
                    continue;
                };
                let next_depth = contour.depth_at(i + 1, label).unwrap_or(depth);
                let length = (next[0] - vertex[0]).hypot(next[1] - vertex[1]);
                let steps = (length / spacing).ceil() as usize;
                for step in 1..steps {
                    let t = step as f64 / steps as f64;
                    samples.push([
                        vertex[0] + t * (next[0] - vertex[0]),
                        vertex[1] + t * (next[1] - vertex[1]),
                        -(depth + t * (next_depth - depth)),
                    ]);
                }
            }
        }
        Ok(samples)
    }
}

/// Estimated river-bed elevations and the polygons they apply within.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiverBathymetryPoints {
    /// Bed elevation samples as `[x, y, z]`.
    pub points: Vec<[f64; 3]>,
    /// River polygons; each is interpolated independently.
    pub polygons: Vec<Polygon<f64>>,
}

fn contains_extent(extents: Option<&MultiPolygon<f64>>, c: Coord<f64>) -> bool {
    extents.is_some_and(|e| covers(e, c))
}

/// Fill the offshore cells not covered by LiDAR from ocean contours.
///
/// Samples are restricted to points inside the offshore region and
/// outside the measured extent.
pub fn interpolate_offshore(
    grid: &ElevationGrid,
    geometry: &CatchmentGeometry,
    extents: Option<&MultiPolygon<f64>>,
    contours: &BathymetryContours,
    params: IdwParams,
) -> Result<ElevationGrid> {
    let offshore = geometry.offshore();
    let samples = contours
        .sample_points(geometry.resolution())?
        .into_iter()
        .filter(|p| {
            let c = coord! { x: p[0], y: p[1] };
            covers(offshore, c) && !contains_extent(extents, c)
        });
    let idw = IdwInterpolator::new(samples, params);
    let mut result = grid.clone();
    if idw.is_empty() {
        warn!("No offshore contour samples outside the LiDAR extent; offshore left unchanged");
        return Ok(result);
    }

    let region = geometry.offshore_without_lidar(extents);
    let mut filled = 0usize;
    for (index, centre) in grid.cell_centres() {
        if grid.source(index) == CellSource::Lidar || !covers(&region, centre) {
            continue;
        }
        if let Some(z) = idw.interpolate(centre.x, centre.y) {
            result.set(index, z, CellSource::Ocean);
            filled += 1;
        }
    }
    info!(samples = idw.len(), cells = filled, "Interpolated offshore bathymetry");
    Ok(result)
}

/// Replace cells inside each river polygon with interpolated bed elevations.
///
/// Polygons narrower than a cell (no cell centre inside) are skipped.
/// Cells inside the measured extent keep their LiDAR values.
pub fn interpolate_river_bathymetry(
    grid: &ElevationGrid,
    extents: Option<&MultiPolygon<f64>>,
    river: &RiverBathymetryPoints,
    params: IdwParams,
) -> ElevationGrid {
    let mut result = grid.clone();

    for (polygon_index, polygon) in river.polygons.iter().enumerate() {
        let region = MultiPolygon::from(polygon.clone());
        let inside: Vec<(usize, Coord<f64>)> = grid
            .cell_centres()
            .filter(|(_, c)| covers(&region, *c))
            .collect();
        if inside.is_empty() {
            debug!(polygon = polygon_index, "River polygon contains no cell centres; skipping");
            continue;
        }

        let idw = IdwInterpolator::new(
            river
                .points
                .iter()
                .copied()
                .filter(|p| covers(&region, coord! { x: p[0], y: p[1] })),
            params,
        );
        if idw.is_empty() {
            debug!(polygon = polygon_index, "River polygon contains no bed samples; skipping");
            continue;
        }

        let mut filled = 0usize;
        for (index, centre) in inside {
            if grid.source(index) == CellSource::Lidar || contains_extent(extents, centre) {
                continue;
            }
            if let Some(z) = idw.interpolate(centre.x, centre.y) {
                result.set(index, z, CellSource::River);
                filled += 1;
            }
        }
        info!(polygon = polygon_index, cells = filled, "Interpolated river bathymetry");
    }

    result
}

/// Fill every remaining no-data cell inside `region` from all valid cells.
pub fn fill_missing(grid: &ElevationGrid, region: &MultiPolygon<f64>, params: IdwParams) -> ElevationGrid {
    let idw = IdwInterpolator::new(
        grid.cell_centres()
            .filter_map(|(i, c)| grid.get(i).map(|z| [c.x, c.y, z])),
        params,
    );
    let mut result = grid.clone();
    if idw.is_empty() {
        warn!("No valid cells to interpolate missing values from");
        return result;
    }

    for (index, centre) in grid.cell_centres() {
        if grid.get(index).is_some() || !covers(region, centre) {
            continue;
        }
        if let Some(z) = idw.interpolate(centre.x, centre.y) {
            result.set(index, z, CellSource::Filled);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSpec;
    use crate::region::Crs;
    use approx::assert_relative_eq;
    use geo::Rect;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()
    }

    fn contour(x: f64, depth: f64) -> DepthContour {
        DepthContour {
            coords: vec![[x, 0.0, depth], [x, 10.0, depth]],
            attributes: BTreeMap::from([("depth".to_string(), depth)]),
        }
    }

    #[test]
    fn test_sample_points_densifies() {
        let contours = BathymetryContours::new(vec![contour(5.0, 3.0)], None);
        let samples = contours.sample_points(2.5).expect("samples");
        assert_eq!(samples.len(), 5);
        assert!(samples.iter().all(|s| s[2] == -3.0));
    }

    #[test]
    fn test_missing_depth_attribute() {
        let mut c = contour(5.0, 3.0);
        c.attributes.clear();
        let contours = BathymetryContours::new(vec![c], Some("depth".into()));
        assert!(matches!(
            contours.sample_points(1.0),
            Err(DemError::MissingDepthAttribute { index: 0, .. })
        ));
    }

    #[test]
    fn test_offshore_preserves_lidar() {
        let geometry = CatchmentGeometry::new(rect(0.0, 0.0, 10.0, 10.0), Crs::default(), 1.0, 1)
            .expect("catchment")
            .with_land(rect(0.0, 0.0, 4.0, 10.0));
        let spec = geometry.grid_spec().expect("spec");
        let mut grid = ElevationGrid::empty(spec);
        for (index, centre) in grid.clone().cell_centres() {
            if centre.x < 4.0 {
                grid.set(index, 2.0, CellSource::Lidar);
            }
        }
        let extents = MultiPolygon::from(rect(0.0, 0.0, 4.0, 10.0));
        let contours = BathymetryContours::new(
            vec![contour(7.0, 4.0), contour(9.5, 8.0)],
            Some("depth".into()),
        );
        let result =
            interpolate_offshore(&grid, &geometry, Some(&extents), &contours, IdwParams::default())
                .expect("interpolate");

        for (index, centre) in result.cell_centres() {
            if centre.x < 4.0 {
                assert_eq!(result.get(index), Some(2.0));
                assert_eq!(result.source(index), CellSource::Lidar);
            } else if centre.x > 5.0 {
                assert_eq!(result.source(index), CellSource::Ocean);
                let z = result.get(index).expect("offshore value");
                assert!((-8.0..=-4.0).contains(&z));
            }
        }
        // The input snapshot is untouched
        assert_eq!(grid.count_source(CellSource::Ocean), 0);
    }

    #[test]
    fn test_river_polygon_narrower_than_cell_is_skipped() {
        let spec = GridSpec::covering(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }), 1.0)
            .expect("spec");
        let grid = ElevationGrid::empty(spec);
        let river = RiverBathymetryPoints {
            points: vec![[5.1, 5.1, -1.0]],
            polygons: vec![rect(5.05, 5.05, 5.2, 5.2)],
        };
        let result = interpolate_river_bathymetry(&grid, None, &river, IdwParams::default());
        assert_eq!(result.count_source(CellSource::River), 0);
    }

    #[test]
    fn test_river_respects_extent() {
        let spec = GridSpec::covering(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 2.0 }), 1.0)
            .expect("spec");
        let grid = ElevationGrid::from_values(spec, vec![3.0; 20], CellSource::Reference).expect("grid");
        let river = RiverBathymetryPoints {
            points: vec![[0.5, 1.0, -1.0], [9.5, 1.0, -1.0]],
            polygons: vec![rect(0.0, 0.0, 10.0, 2.0)],
        };
        let extents = MultiPolygon::from(rect(0.0, 0.0, 5.0, 2.0));
        let result = interpolate_river_bathymetry(&grid, Some(&extents), &river, IdwParams::default());
        assert_eq!(result.count_source(CellSource::River), 10);
        for (index, centre) in result.cell_centres() {
            if centre.x < 5.0 {
                assert_eq!(result.get(index), Some(3.0));
            } else {
                assert_relative_eq!(result.get(index).expect("value"), -1.0);
            }
        }
    }

    #[test]
    fn test_fill_missing_only_in_region() {
        let spec = GridSpec::covering(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 3.0, y: 1.0 }), 1.0)
            .expect("spec");
        let grid = ElevationGrid::from_values(spec, vec![1.0, f64::NAN, f64::NAN], CellSource::Lidar)
            .expect("grid");
        let region = MultiPolygon::from(rect(0.0, 0.0, 2.0, 1.0));
        let result = fill_missing(&grid, &region, IdwParams::default());
        assert_eq!(result.get(1), Some(1.0));
        assert_eq!(result.source(1), CellSource::Filled);
        assert!(result.get(2).is_none());
    }
}
