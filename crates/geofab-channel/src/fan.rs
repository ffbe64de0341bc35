//! River-mouth fan: the offshore extension of a channel.
//!
//! The fan is a trapezoid starting at the mouth with the river width and
//! widening at a fixed angle on each side. It is cut off at the nearest
//! ocean contour deeper than twice the river-mouth bed depth, and a depth
//! profile is laid along its centreline from the river bed down to that
//! contour.

use crate::{BedElevationEstimate, ChannelError, Result};
use geo::{coord, Coord, EuclideanDistance, Line, LineString, Point, Polygon};
use geofab_dem::BathymetryContours;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Half-angle at which the fan widens, in degrees.
pub const FAN_ANGLE_DEGREES: f64 = 15.0;
/// Length of the fan before clipping.
pub const FAN_LENGTH: f64 = 10_000.0;
/// The terminating contour must be deeper than this multiple of the mouth depth.
pub const DEPTH_MULTIPLIER: f64 = 2.0;
/// How many transect spacings upstream the mouth estimate may come from.
pub const MOUTH_SEARCH_SAMPLES: f64 = 5.0;
/// Contour depths are positive down; elevations are positive up.
const DEPTH_SIGN: f64 = -1.0;

/// Fan geometry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FanParams {
    /// Half-angle of the fan in degrees.
    pub angle_degrees: f64,
    /// Unclipped fan length.
    pub length: f64,
    /// Required contour depth as a multiple of the mouth depth.
    pub depth_multiplier: f64,
}

impl Default for FanParams {
    fn default() -> Self {
        Self {
            angle_degrees: FAN_ANGLE_DEGREES,
            length: FAN_LENGTH,
            depth_multiplier: DEPTH_MULTIPLIER,
        }
    }
}

/// A fan polygon and the bed elevations laid along it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiverMouthFan {
    /// Fan outline, terminating on the matched contour.
    pub polygon: Polygon<f64>,
    /// Elevation samples `[x, y, z]` along the fan centreline.
    pub bathymetry: Vec<[f64; 3]>,
    /// Depth of the matched contour.
    pub end_depth: f64,
    /// Distance from the mouth to the matched contour.
    pub distance: f64,
}

impl RiverMouthFan {
    /// Build the fan for a channel whose centreline starts at the mouth.
    ///
    /// `mouth_bed_elevation` and `mouth_width` are the bed elevation and
    /// width at the first channel sample. Fails with
    /// [`ChannelError::NoMatchingContour`] if no sufficiently deep contour
    /// crosses the fan.
    pub fn build(
        centreline: &LineString<f64>,
        mouth_bed_elevation: f64,
        mouth_width: f64,
        contours: &BathymetryContours,
        spacing: f64,
        params: &FanParams,
    ) -> Result<Self> {
        let (mouth, tangent) = mouth_direction(centreline)?;
        let normal = coord! { x: -tangent.y, y: tangent.x };
        let end_width = mouth_width + 2.0 * params.length * params.angle_degrees.to_radians().tan();
        let end = offset(mouth, tangent, params.length);

        let mouth_right = offset(mouth, normal, -mouth_width / 2.0);
        let mouth_left = offset(mouth, normal, mouth_width / 2.0);
        let end_left = offset(end, normal, end_width / 2.0);
        let end_right = offset(end, normal, -end_width / 2.0);
        let trapezoid = [mouth_right, mouth_left, end_left, end_right];

        let label = contours.z_label.as_deref();
        let min_depth = params.depth_multiplier * mouth_bed_elevation * DEPTH_SIGN;
        let mouth_point = Point::from(mouth);
        let (distance, end_depth, crossing) = contours
            .contours
            .iter()
            .filter_map(|c| c.depth(label).filter(|d| *d > min_depth).map(|d| (d, c)))
            .flat_map(|(depth, c)| {
                clip_to_convex(&c.line_string().0, &trapezoid)
                    .into_iter()
                    .map(move |piece| (depth, LineString::from(piece)))
            })
            .map(|(depth, line)| (mouth_point.euclidean_distance(&line), depth, line))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)))
            .ok_or(ChannelError::NoMatchingContour { min_depth })?;

        // Close the polygon through the mouth without crossing the contour
        let left_edge = Line::new(mouth_left, end_left);
        let first = Point::from(crossing.0[0]);
        let last = Point::from(crossing.0[crossing.0.len() - 1]);
        let mut ring = crossing.0.clone();
        if first.euclidean_distance(&left_edge) < last.euclidean_distance(&left_edge) {
            ring.extend([mouth_right, mouth_left]);
        } else {
            ring.extend([mouth_left, mouth_right]);
        }
        let polygon = Polygon::new(LineString::from(ring), vec![]);

        let bathymetry = depth_profile(mouth, tangent, mouth_bed_elevation, end_depth, distance, spacing);
        info!(end_depth, distance, samples = bathymetry.len(), "Built river-mouth fan");

        Ok(Self {
            polygon,
            bathymetry,
            end_depth,
            distance,
        })
    }
}

/// The bed estimate the fan starts from: the one nearest the mouth.
///
/// Samples at the mouth are skipped when their windowed means are missing,
/// so the nearest estimate may lie upstream. It is accepted up to
/// `max_distance` along the channel.
pub fn mouth_estimate(estimates: &[BedElevationEstimate], max_distance: f64) -> Result<&BedElevationEstimate> {
    let nearest = estimates
        .iter()
        .min_by(|a, b| a.chainage.abs().total_cmp(&b.chainage.abs()))
        .filter(|e| e.chainage.abs() <= max_distance)
        .ok_or(ChannelError::NoMouthEstimate { max_distance })?;
    if nearest.chainage.abs() > 0.0 {
        warn!(
            distance = nearest.chainage.abs(),
            "No bed estimate at the river mouth; using the nearest upstream estimate"
        );
    }
    Ok(nearest)
}

/// Mouth point and the unit direction pointing out to sea.
fn mouth_direction(centreline: &LineString<f64>) -> Result<(Coord<f64>, Coord<f64>)> {
    let (Some(p0), Some(p1)) = (centreline.0.first(), centreline.0.get(1)) else {
        return Err(ChannelError::DegenerateGeometry(
            "channel needs at least two points to orient the fan".into(),
        ));
    };
    let dx = p0.x - p1.x;
    let dy = p0.y - p1.y;
    let length = dx.hypot(dy);
    if !(length > f64::EPSILON) {
        return Err(ChannelError::DegenerateGeometry(
            "zero-length segment at the river mouth".into(),
        ));
    }
    Ok((*p0, coord! { x: dx / length, y: dy / length }))
}

fn offset(origin: Coord<f64>, direction: Coord<f64>, distance: f64) -> Coord<f64> {
    coord! { x: origin.x + direction.x * distance, y: origin.y + direction.y * distance }
}

/// Elevations stepping linearly from the mouth bed down to `-end_depth`.
fn depth_profile(
    mouth: Coord<f64>,
    tangent: Coord<f64>,
    bed_elevation: f64,
    end_depth: f64,
    distance: f64,
    spacing: f64,
) -> Vec<[f64; 3]> {
    let samples = (distance / spacing).floor() as usize;
    if samples == 0 {
        return Vec::new();
    }
    let increment = (DEPTH_SIGN * end_depth - bed_elevation) / samples as f64;
    (1..samples)
        .map(|i| {
            let p = offset(mouth, tangent, i as f64 * spacing);
            [p.x, p.y, bed_elevation + i as f64 * increment]
        })
        .collect()
}

fn cross(a: Coord<f64>, b: Coord<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Parts of a polyline inside a convex polygon, in line order.
fn clip_to_convex(line: &[Coord<f64>], polygon: &[Coord<f64>]) -> Vec<Vec<Coord<f64>>> {
    let signed_area: f64 = (0..polygon.len())
        .map(|i| cross(polygon[i], polygon[(i + 1) % polygon.len()]))
        .sum();
    let orientation = signed_area.signum();

    let mut pieces: Vec<Vec<Coord<f64>>> = Vec::new();
    let mut open = false;
    for segment in line.windows(2) {
        let (p0, p1) = (segment[0], segment[1]);
        let d = p1 - p0;
        let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
        let mut inside = true;
        for i in 0..polygon.len() {
            let a = polygon[i];
            let edge = polygon[(i + 1) % polygon.len()] - a;
            let num = cross(edge, p0 - a) * orientation;
            let den = cross(edge, d) * orientation;
            if den == 0.0 {
                if num < 0.0 {
                    inside = false;
                    break;
                }
            } else if den > 0.0 {
                t0 = t0.max(-num / den);
            } else {
                t1 = t1.min(-num / den);
            }
        }
        if !inside || t0 > t1 {
            open = false;
            continue;
        }
        let start = p0 + d * t0;
        let end = p0 + d * t1;
        match pieces.last_mut() {
            Some(piece) if open && t0 == 0.0 => piece.push(end),
            _ => pieces.push(vec![start, end]),
        }
        open = t1 == 1.0;
    }
    pieces
}
