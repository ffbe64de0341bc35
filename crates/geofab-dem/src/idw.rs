//! Inverse-distance-weighted interpolation.
//!
//! Two flavours are provided:
//! - [`IdwInterpolator`] interpolates from scattered samples held in an
//!   R-tree (contour vertices, river-bed estimates, valid grid cells).
//! - [`fill_gaps_from_neighbours`] fills grid cells directly from the
//!   valid cells within a radius, used for the small gaps left inside the
//!   measured extent.
//!
//! In both cases the estimate at `x` is
//! `sum(w_i * z_i) / sum(w_i)` with `w_i = 1 / d_i^p`.

use crate::grid::{CellSource, ElevationGrid};
use rstar::primitives::GeomWithData;
use rstar::RTree;

/// Default IDW distance exponent.
pub const DEFAULT_IDW_POWER: f64 = 2.0;
/// Default neighbour count for scattered interpolation.
pub const DEFAULT_NEIGHBOURS: usize = 8;

/// Distances below this are treated as an exact hit on a sample.
const DISTANCE_TOLERANCE: f64 = 1e-10;

/// How neighbours are selected for each estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IdwSearch {
    /// Every sample within this distance.
    Radius(f64),
    /// The `k` nearest samples.
    Nearest(usize),
}

/// IDW parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdwParams {
    /// Distance exponent.
    pub power: f64,
    /// Neighbour selection.
    pub search: IdwSearch,
}

impl Default for IdwParams {
    fn default() -> Self {
        Self {
            power: DEFAULT_IDW_POWER,
            search: IdwSearch::Nearest(DEFAULT_NEIGHBOURS),
        }
    }
}

type Sample = GeomWithData<[f64; 2], f64>;

/// Scattered-sample IDW interpolator backed by an R-tree.
#[derive(Debug)]
pub struct IdwInterpolator {
    tree: RTree<Sample>,
    params: IdwParams,
}

impl IdwInterpolator {
    /// Build an interpolator from `[x, y, z]` samples; non-finite samples are dropped.
    pub fn new(samples: impl IntoIterator<Item = [f64; 3]>, params: IdwParams) -> Self {
        let samples: Vec<Sample> = samples
            .into_iter()
            .filter(|[x, y, z]| x.is_finite() && y.is_finite() && z.is_finite())
            .map(|[x, y, z]| GeomWithData::new([x, y], z))
            .collect();
        Self {
            tree: RTree::bulk_load(samples),
            params,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// True if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Estimate at a point, `None` if no sample is in range.
    pub fn interpolate(&self, x: f64, y: f64) -> Option<f64> {
        let query = [x, y];
        match self.params.search {
            IdwSearch::Radius(radius) => weighted_mean(
                self.tree
                    .locate_within_distance(query, radius * radius)
                    .map(|s| (distance_2(s.geom(), &query), s.data)),
                self.params.power,
            ),
            IdwSearch::Nearest(k) => weighted_mean(
                self.tree
                    .nearest_neighbor_iter_with_distance_2(&query)
                    .take(k.max(1))
                    .map(|(s, d2)| (d2, s.data)),
                self.params.power,
            ),
        }
    }
}

fn distance_2(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// IDW mean of `(squared distance, value)` pairs.
fn weighted_mean(neighbours: impl Iterator<Item = (f64, f64)>, power: f64) -> Option<f64> {
    let mut weight_sum = 0.0;
    let mut value_sum = 0.0;
    for (d2, value) in neighbours {
        let distance = d2.sqrt();
        if distance < DISTANCE_TOLERANCE {
            return Some(value);
        }
        let weight = 1.0 / distance.powf(power);
        weight_sum += weight;
        value_sum += weight * value;
    }
    (weight_sum > 0.0).then(|| value_sum / weight_sum)
}

/// Fill the cells selected by `mask` from valid cells within `radius`.
///
/// Estimates are computed from the grid as given, so a filled cell never
/// contributes to another fill in the same pass. Cells with no valid
/// neighbour in range stay no data. Returns the number of cells filled.
pub fn fill_gaps_from_neighbours(
    grid: &mut ElevationGrid,
    mask: &[bool],
    radius: f64,
    power: f64,
) -> usize {
    let spec = *grid.spec();
    let reach = (radius / spec.resolution).floor() as isize;
    let snapshot = grid.values().to_vec();
    let mut filled = Vec::new();

    for index in (0..spec.len()).filter(|i| mask[*i] && !snapshot[*i].is_finite()) {
        let (row, col) = spec.row_col(index);
        let centre = spec.cell_centre(row, col);
        let mut neighbours = Vec::new();
        for dr in -reach..=reach {
            for dc in -reach..=reach {
                let (r, c) = (row as isize + dr, col as isize + dc);
                if r < 0 || c < 0 || r >= spec.height as isize || c >= spec.width as isize {
                    continue;
                }
                let value = snapshot[spec.index(r as usize, c as usize)];
                if !value.is_finite() {
                    continue;
                }
                let other = spec.cell_centre(r as usize, c as usize);
                let d2 = (other.x - centre.x).powi(2) + (other.y - centre.y).powi(2);
                if d2 <= radius * radius * (1.0 + 1e-12) {
                    neighbours.push((d2, value));
                }
            }
        }
        if let Some(value) = weighted_mean(neighbours.into_iter(), power) {
            filled.push((index, value));
        }
    }

    let count = filled.len();
    for (index, value) in filled {
        grid.set(index, value, CellSource::GapFill);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSpec;
    use approx::assert_relative_eq;
    use geo::{coord, Rect};

    #[test]
    fn test_exact_hit_returns_sample() {
        let idw = IdwInterpolator::new([[0.0, 0.0, 5.0], [10.0, 0.0, 1.0]], IdwParams::default());
        assert_eq!(idw.interpolate(0.0, 0.0), Some(5.0));
    }

    #[test]
    fn test_midpoint_is_mean() {
        let idw = IdwInterpolator::new([[0.0, 0.0, 2.0], [2.0, 0.0, 4.0]], IdwParams::default());
        assert_relative_eq!(idw.interpolate(1.0, 0.0).expect("value"), 3.0);
    }

    #[test]
    fn test_radius_search_out_of_range() {
        let params = IdwParams {
            power: 2.0,
            search: IdwSearch::Radius(1.0),
        };
        let idw = IdwInterpolator::new([[0.0, 0.0, 2.0]], params);
        assert!(idw.interpolate(5.0, 5.0).is_none());
        assert!(idw.interpolate(0.5, 0.5).is_some());
    }

    #[test]
    fn test_non_finite_samples_dropped() {
        let idw = IdwInterpolator::new([[0.0, 0.0, f64::NAN], [1.0, 1.0, 1.0]], IdwParams::default());
        assert_eq!(idw.len(), 1);
    }

    #[test]
    fn test_gap_fill_uses_eight_neighbourhood() {
        let spec = GridSpec::covering(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 3.0, y: 3.0 }), 1.0)
            .expect("valid grid");
        let mut values = vec![1.0; 9];
        values[4] = f64::NAN;
        values[0] = 9.0; // diagonal neighbour, at distance sqrt(2)
        let mut grid = ElevationGrid::from_values(spec, values, CellSource::Lidar).expect("grid");
        let filled = fill_gaps_from_neighbours(&mut grid, &[true; 9], 2.0_f64.sqrt(), 2.0);
        assert_eq!(filled, 1);
        assert_eq!(grid.source(4), CellSource::GapFill);
        // Four edge neighbours weigh 1, four diagonals weigh 1/2.
        let expected = (4.0 * 1.0 + 0.5 * (9.0 + 3.0)) / (4.0 + 2.0);
        assert_relative_eq!(grid.get(4).expect("filled"), expected, epsilon = 1e-12);
        // Measured cells untouched.
        assert_eq!(grid.get(0), Some(9.0));
        assert_eq!(grid.source(0), CellSource::Lidar);
    }

    #[test]
    fn test_gap_fill_respects_mask() {
        let spec = GridSpec::covering(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 2.0, y: 1.0 }), 1.0)
            .expect("valid grid");
        let mut grid =
            ElevationGrid::from_values(spec, vec![1.0, f64::NAN], CellSource::Lidar).expect("grid");
        assert_eq!(fill_gaps_from_neighbours(&mut grid, &[true, false], 1.5, 2.0), 0);
        assert!(grid.get(1).is_none());
    }
}
