//! End-to-end tests for dense DEM assembly.
//!
//! Synthetic point clouds are generated from a seeded ChaCha RNG so every
//! run sees the same tiles.

use approx::assert_relative_eq;
use geo::{coord, Area, MultiPolygon, Rect};
use geofab_dem::{
    BathymetryContours, CatchmentGeometry, CellSource, CoveragePolicy, Crs, DenseDem,
    DenseDemParams, DepthContour, ElevationGrid, GridSpec, LidarPoint, PointCloudTile,
    ReferenceDem, GROUND,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

// ============================================================================
// Synthetic inputs
// ============================================================================

/// Side length of the square test catchment.
const SIDE: f64 = 30.0;
/// Tiles per side.
const TILES_PER_SIDE: usize = 3;

fn boundary() -> geo::Polygon<f64> {
    Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: SIDE, y: SIDE }).to_polygon()
}

fn surface(x: f64, y: f64) -> f64 {
    5.0 + 0.1 * x - 0.05 * y
}

/// A 3x3 grid of tiles, each with `per_cell` random ground returns in every
/// 1 m cell plus some vegetation returns that must be ignored.
fn synthetic_tiles(seed: u64, per_cell: usize) -> Vec<PointCloudTile> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let tile_side = SIDE / TILES_PER_SIDE as f64;
    let mut tiles = Vec::new();

    for ty in 0..TILES_PER_SIDE {
        for tx in 0..TILES_PER_SIDE {
            let x0 = tx as f64 * tile_side;
            let y0 = ty as f64 * tile_side;
            let mut points = Vec::new();
            for cx in 0..tile_side as usize {
                for cy in 0..tile_side as usize {
                    for _ in 0..per_cell {
                        let x = x0 + cx as f64 + rng.gen_range(0.05..0.95);
                        let y = y0 + cy as f64 + rng.gen_range(0.05..0.95);
                        points.push(LidarPoint {
                            x,
                            y,
                            z: surface(x, y) + rng.gen_range(-0.05..0.05),
                            classification: GROUND,
                        });
                    }
                    points.push(LidarPoint {
                        x: x0 + cx as f64 + 0.5,
                        y: y0 + cy as f64 + 0.5,
                        z: 50.0,
                        classification: 5,
                    });
                }
            }
            tiles.push(PointCloudTile {
                name: format!("tile_{tx}_{ty}"),
                points,
            });
        }
    }
    tiles
}

fn geometry() -> CatchmentGeometry {
    CatchmentGeometry::new(boundary(), Crs::default(), 1.0, 2).expect("valid catchment")
}

fn assemble(tiles: &[PointCloudTile], cores: usize, chunk_size: Option<usize>) -> DenseDem {
    let params = DenseDemParams {
        number_of_cores: cores,
        chunk_size,
        ..Default::default()
    };
    let mut dem = DenseDem::new(geometry(), params).expect("dense dem");
    dem.add_lidar(tiles).expect("add lidar");
    dem
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_full_coverage_has_no_gaps() {
    let tiles = synthetic_tiles(42, 3);
    let dem = assemble(&tiles, 1, None);

    assert_eq!(dem.dem().no_data_count(), 0);
    let extents = dem.extents().expect("measured extent");
    assert_relative_eq!(extents.unsigned_area(), SIDE * SIDE, max_relative = 1e-9);

    // Vegetation returns at 50 m must not leak into the ground surface
    for (index, centre) in dem.dem().cell_centres() {
        let z = dem.dem().get(index).expect("value");
        assert!((z - surface(centre.x, centre.y)).abs() < 0.6, "cell {index} = {z}");
    }
}

#[test]
fn test_bit_identical_across_worker_counts() {
    let tiles = synthetic_tiles(7, 4);
    let serial = assemble(&tiles, 1, None);
    for (cores, chunk) in [(2, None), (4, Some(2)), (4, Some(5))] {
        let parallel = assemble(&tiles, cores, chunk);
        let a: Vec<u64> = serial.dem().values().iter().map(|v| v.to_bits()).collect();
        let b: Vec<u64> = parallel.dem().values().iter().map(|v| v.to_bits()).collect();
        assert_eq!(a, b, "cores = {cores}, chunk = {chunk:?}");
        assert_eq!(serial.extents(), parallel.extents());
    }
}

#[test]
fn test_measured_cells_survive_later_stages() {
    // Only the western two thirds of the catchment have LiDAR
    let tiles: Vec<PointCloudTile> = synthetic_tiles(3, 2)
        .into_iter()
        .filter(|t| !t.name.starts_with("tile_2_"))
        .collect();
    let mut dem = assemble(&tiles, 2, None);
    let measured: Vec<(usize, f64)> = dem
        .dem()
        .cell_centres()
        .filter(|(i, _)| dem.dem().source(*i) == CellSource::Lidar)
        .map(|(i, _)| (i, dem.dem().values()[i]))
        .collect();
    assert!(!measured.is_empty());

    let geometry = dem.catchment().clone();
    let uncovered = geometry.land_and_foreshore_without_lidar(dem.extents());
    assert!(CoveragePolicy::default().needs_supplementary(geometry.land_and_foreshore(), &uncovered));

    let spec = GridSpec::covering(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: SIDE, y: SIDE }), 5.0)
        .expect("spec");
    let background = ElevationGrid::from_values(spec, vec![100.0; spec.len()], CellSource::Reference)
        .expect("background");
    dem.add_reference_dem(&ReferenceDem::from_grid(&background), true);
    dem.interpolate_missing();

    for (index, value) in measured {
        assert_eq!(dem.dem().values()[index].to_bits(), value.to_bits());
        assert_eq!(dem.dem().source(index), CellSource::Lidar);
    }
    assert_eq!(dem.dem().no_data_count(), 0);
    assert!(dem.dem().count_source(CellSource::Reference) > 0);
}

#[test]
fn test_well_covered_region_skips_supplement() {
    let dem = assemble(&synthetic_tiles(11, 1), 1, None);
    let geometry = dem.catchment();
    let uncovered = geometry.land_and_foreshore_without_lidar(dem.extents());
    assert!(!CoveragePolicy::default().needs_supplementary(geometry.land_and_foreshore(), &uncovered));
}

#[test]
fn test_coastal_catchment_offshore_fill() {
    let land = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 20.0, y: SIDE }).to_polygon();
    let geometry = geometry().with_land(land);
    let mut dem = DenseDem::new(geometry, DenseDemParams::default()).expect("dense dem");

    // Offshore returns are dropped before rasterisation
    dem.add_lidar(&synthetic_tiles(5, 1)).expect("add lidar");
    let extents: &MultiPolygon<f64> = dem.extents().expect("extent");
    assert_relative_eq!(extents.unsigned_area(), 22.0 * SIDE, max_relative = 1e-6);

    let contours = BathymetryContours::new(
        vec![
            DepthContour {
                coords: vec![[25.0, 0.0, 2.0], [25.0, SIDE, 2.0]],
                attributes: BTreeMap::new(),
            },
            DepthContour {
                coords: vec![[29.5, 0.0, 6.0], [29.5, SIDE, 6.0]],
                attributes: BTreeMap::new(),
            },
        ],
        None,
    );
    dem.interpolate_offshore(&contours).expect("offshore");
    dem.interpolate_missing();

    assert_eq!(dem.dem().no_data_count(), 0);
    let z = dem.dem().sample(27.5, 15.5).expect("offshore value");
    assert!((-6.0..=-2.0).contains(&z), "offshore elevation {z}");
    assert_eq!(dem.dem().source(dem.dem().spec().index(14, 1)), CellSource::Lidar);
}
