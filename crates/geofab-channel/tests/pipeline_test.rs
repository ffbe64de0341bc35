//! End-to-end channel characterisation on a synthetic valley.
//!
//! The valley runs east-west with its mouth at the east end. The river
//! network places the channel 7 m north of where the DEM shows it, so
//! alignment has to move it.

use approx::assert_relative_eq;
use geo::{coord, LineString, Rect};
use geofab_channel::{
    align_channel, estimate_bed_elevations, estimate_width_and_slope, AlignParams, Channel,
    ChannelError, FanParams, FlowEntry, FlowTable, Reach, ReachNetwork, RiverMouthFan,
    TransectParams,
};
use geofab_dem::{BathymetryContours, CellSource, DepthContour, ElevationGrid, GridSpec};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

const RESOLUTION: f64 = 2.0;
const TRANSECT_SPACING: f64 = 20.0;
const CHANNEL_Y: f64 = 200.0;

fn bed(x: f64) -> f64 {
    0.001 * (2000.0 - x)
}

fn ground_dem(seed: u64) -> ElevationGrid {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let spec = GridSpec::covering(
        Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 2000.0, y: 400.0 }),
        RESOLUTION,
    )
    .expect("spec");
    let values = (0..spec.len())
        .map(|i| {
            let (row, col) = spec.row_col(i);
            let c = spec.cell_centre(row, col);
            if (c.y - CHANNEL_Y).abs() < 5.0 {
                bed(c.x)
            } else {
                bed(c.x) + 3.0 + rng.gen_range(-0.2..0.2)
            }
        })
        .collect();
    ElevationGrid::from_values(spec, values, CellSource::Lidar).expect("grid")
}

fn network() -> ReachNetwork {
    ReachNetwork::new(vec![
        Reach {
            id: 7,
            geometry: LineString::from(vec![(1000.0, 207.0), (1900.0, 207.0)]),
            area: 5.0e7,
        },
        Reach {
            id: 8,
            geometry: LineString::from(vec![(100.0, 207.0), (1000.0, 207.0)]),
            area: 4.0e7,
        },
    ])
}

fn transect(max_channel_width: f64, tolerance: f64, buffer: f64, max_bank_height: Option<f64>) -> TransectParams {
    TransectParams {
        sample_spacing: RESOLUTION,
        radius: max_channel_width / 2.0 + tolerance + buffer,
        search_radius: tolerance,
        threshold: 1.0,
        min_channel_width: 4.0,
        max_bank_height,
    }
}

fn flows() -> FlowTable {
    FlowTable::new([
        FlowEntry {
            reach_id: 7,
            flow: 20.0,
            mannings_n: 0.035,
        },
        FlowEntry {
            reach_id: 8,
            flow: 12.0,
            mannings_n: 0.035,
        },
    ])
}

#[test]
fn test_channel_pipeline() {
    let dem = ground_dem(21);
    let channel = Channel::from_rec(&network(), 7, TRANSECT_SPACING, 1.0e6).expect("channel");
    assert_eq!(channel.reaches().len(), 2);

    let seed = channel.get_sampled_spline_fit();
    assert_relative_eq!(seed.0[0].x, 1900.0);

    let align = AlignParams {
        transect: transect(20.0, 10.0, 10.0, None),
        width_centre_smoothing: 2.0,
    };
    let aligned = align_channel(&seed, &dem, None, TRANSECT_SPACING, &align).expect("align");
    let valid = aligned.cross_sections.iter().filter(|cs| cs.valid).count();
    assert_eq!(valid, aligned.cross_sections.len());
    for c in &aligned.line.0 {
        assert_relative_eq!(c.y, CHANNEL_Y, epsilon = 1e-9);
    }

    let characteristics =
        estimate_width_and_slope(&aligned.line, &dem, None, &transect(20.0, 10.0, 10.0, Some(5.0)))
            .expect("characteristics");
    let middle = &characteristics.samples[characteristics.samples.len() / 2];
    assert!(middle.valid);
    assert_eq!(middle.width, Some(8.0));
    assert_relative_eq!(middle.means.slope_mean_2km.expect("slope"), 0.001, max_relative = 0.1);
    assert!(characteristics.river_polygon.is_some());

    let estimates = estimate_bed_elevations(&characteristics.samples, &channel, &flows()).expect("bed");
    assert!(!estimates.is_empty());
    for e in &estimates {
        let sample = characteristics
            .samples
            .iter()
            .find(|s| s.chainage == e.chainage)
            .expect("sample");
        let min_z = sample.min_z_centre.expect("min z");
        assert!(e.bed_elevation_smart_et_al <= min_z);
        assert!(e.bed_elevation_neal_et_al <= min_z);
        assert!(e.depth_smart_et_al >= 0.0 && e.depth_neal_et_al >= 0.0);
    }
    assert!(estimates.iter().any(|e| e.reach_id == 7));
    assert!(estimates.iter().any(|e| e.reach_id == 8));

    let contour = |x: f64, depth: f64| DepthContour {
        coords: vec![[x, -2000.0, depth], [x, 2400.0, depth]],
        attributes: BTreeMap::from([("depth".to_string(), depth)]),
    };
    let contours = BathymetryContours::new(
        vec![contour(2600.0, 8.0), contour(2300.0, 4.0)],
        Some("depth".into()),
    );
    let mouth = &estimates[0];
    let fan = RiverMouthFan::build(
        &aligned.line,
        mouth.bed_elevation_smart_et_al,
        mouth.width,
        &contours,
        TRANSECT_SPACING,
        &FanParams::default(),
    )
    .expect("fan");
    assert_eq!(fan.end_depth, 4.0);
    assert_relative_eq!(fan.distance, 400.0, max_relative = 1e-9);
    assert!(fan.bathymetry.iter().all(|p| p[0] > 1900.0 && p[0] < 2300.0));
}

#[test]
fn test_missing_flow_entry_aborts_bed_estimate() {
    let dem = ground_dem(3);
    let channel = Channel::from_rec(&network(), 7, TRANSECT_SPACING, 0.0).expect("channel");
    let aligned = align_channel(
        &channel.get_sampled_spline_fit(),
        &dem,
        None,
        TRANSECT_SPACING,
        &AlignParams {
            transect: transect(20.0, 10.0, 10.0, None),
            width_centre_smoothing: 2.0,
        },
    )
    .expect("align");
    let characteristics =
        estimate_width_and_slope(&aligned.line, &dem, None, &transect(20.0, 10.0, 10.0, None))
            .expect("characteristics");

    let partial = FlowTable::new([FlowEntry {
        reach_id: 7,
        flow: 20.0,
        mannings_n: 0.035,
    }]);
    let result = estimate_bed_elevations(&characteristics.samples, &channel, &partial);
    assert!(matches!(result, Err(ChannelError::MissingCoefficient { reach_id: 8 })));
}
