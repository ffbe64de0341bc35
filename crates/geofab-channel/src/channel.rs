//! Channel centrelines traced from a river network.

use crate::{ChannelError, Result};
use geo::{coord, Coord, EuclideanDistance, LineString, MultiPolygon, Point};
use geofab_dem::buffer_line_string;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Distance within which two reach end points are considered connected.
pub const CONNECTIVITY_TOLERANCE: f64 = 1e-3;

/// Spline evaluations per control-polygon span before resampling.
const SPLINE_SAMPLES_PER_SPAN: usize = 16;

/// One edge of the river network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reach {
    /// Reach identifier.
    #[serde(alias = "nzsegment")]
    pub id: i64,
    /// Centreline, ordered from upstream to downstream.
    pub geometry: LineString<f64>,
    /// Upstream contributing area.
    pub area: f64,
}

/// A river network; topology is implied by shared end points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReachNetwork {
    /// Every reach in the network.
    pub reaches: Vec<Reach>,
}

fn same_point(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).hypot(a.y - b.y) <= CONNECTIVITY_TOLERANCE
}

impl ReachNetwork {
    /// Create a network from its reaches.
    pub fn new(reaches: Vec<Reach>) -> Self {
        Self { reaches }
    }

    /// Look up a reach by id.
    pub fn get(&self, id: i64) -> Option<&Reach> {
        self.reaches.iter().find(|r| r.id == id)
    }

    /// Reaches flowing into the upstream end of `reach`.
    pub fn upstream_of<'a>(&'a self, reach: &'a Reach) -> impl Iterator<Item = &'a Reach> + 'a {
        let head = reach.geometry.0.first().copied();
        self.reaches.iter().filter(move |r| {
            r.id != reach.id
                && matches!((r.geometry.0.last(), head), (Some(tail), Some(head)) if same_point(*tail, head))
        })
    }
}

/// A channel centreline ordered from the mouth upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Reaches making up the channel, mouth first.
    reaches: Vec<Reach>,
    /// Concatenated centreline, mouth first.
    line: LineString<f64>,
    /// Sample spacing used for resampling.
    resolution: f64,
}

impl Channel {
    /// Trace the main stem upstream from `reach_id`.
    ///
    /// At each junction the upstream reach with the largest contributing
    /// area is followed, provided that area is at least `area_threshold`.
    /// The starting reach is always included.
    pub fn from_rec(
        network: &ReachNetwork,
        reach_id: i64,
        resolution: f64,
        area_threshold: f64,
    ) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(ChannelError::DegenerateGeometry(format!(
                "sample spacing {resolution} must be positive"
            )));
        }
        let start = network.get(reach_id).ok_or(ChannelError::ReachNotFound(reach_id))?;

        let mut reaches = vec![start.clone()];
        let mut visited = BTreeSet::from([start.id]);
        let mut current = start;
        while let Some(next) = network
            .upstream_of(current)
            .filter(|r| r.area >= area_threshold && !visited.contains(&r.id))
            .max_by(|a, b| a.area.total_cmp(&b.area).then(b.id.cmp(&a.id)))
        {
            visited.insert(next.id);
            reaches.push(next.clone());
            current = next;
        }
        debug!(reach_id, reaches = reaches.len(), "Traced channel upstream");

        let mut coords: Vec<Coord<f64>> = Vec::new();
        for reach in &reaches {
            for c in reach.geometry.0.iter().rev() {
                if coords.last().map_or(true, |last| !same_point(*last, *c)) {
                    coords.push(*c);
                }
            }
        }
        if coords.len() < 2 {
            return Err(ChannelError::DegenerateGeometry(format!(
                "reach {reach_id} has fewer than two distinct vertices"
            )));
        }

        Ok(Self {
            reaches,
            line: LineString::from(coords),
            resolution,
        })
    }

    /// Reaches making up the channel, mouth first.
    pub fn reaches(&self) -> &[Reach] {
        &self.reaches
    }

    /// Centreline, mouth first.
    pub fn line(&self) -> &LineString<f64> {
        &self.line
    }

    /// Sample spacing.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Points every `spacing` along the centreline, starting at the mouth.
    pub fn get_spaced_points(&self, spacing: f64) -> Vec<Coord<f64>> {
        resample(&self.line.0, spacing)
    }

    /// Smoothed centreline resampled at the channel resolution.
    ///
    /// A clamped uniform cubic B-spline is fitted with the centreline
    /// vertices as control points, so the ends are kept and corners are
    /// rounded off.
    pub fn get_sampled_spline_fit(&self) -> LineString<f64> {
        let dense = cubic_b_spline(&self.line.0, SPLINE_SAMPLES_PER_SPAN);
        LineString::from(resample(&dense, self.resolution))
    }

    /// Corridor polygon of half-width `corridor_radius` around the centreline.
    pub fn get_channel_catchment(&self, corridor_radius: f64) -> MultiPolygon<f64> {
        buffer_line_string(&self.line, corridor_radius)
    }

    /// Id of the reach nearest a point; ties go to the smaller id.
    pub fn nearest_reach(&self, point: Coord<f64>) -> Option<i64> {
        let point = Point::from(point);
        self.reaches
            .iter()
            .map(|r| (point.euclidean_distance(&r.geometry), r.id))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, id)| id)
    }
}

/// Points every `spacing` of arc length along a polyline, first vertex included.
pub fn resample(coords: &[Coord<f64>], spacing: f64) -> Vec<Coord<f64>> {
    let Some(first) = coords.first() else {
        return Vec::new();
    };
    let mut points = vec![*first];
    if !(spacing > 0.0) {
        return points;
    }

    let mut next_at = spacing;
    let mut travelled = 0.0;
    for pair in coords.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let length = (b.x - a.x).hypot(b.y - a.y);
        // Allow for accumulated rounding on the final sample
        while length > 0.0 && next_at <= travelled + length + 1e-9 * spacing {
            let t = ((next_at - travelled) / length).min(1.0);
            points.push(coord! { x: a.x + t * (b.x - a.x), y: a.y + t * (b.y - a.y) });
            next_at += spacing;
        }
        travelled += length;
    }
    points
}

/// Cumulative arc length at each vertex.
pub fn chainages(coords: &[Coord<f64>]) -> Vec<f64> {
    let mut total = 0.0;
    let mut out = Vec::with_capacity(coords.len());
    for (i, c) in coords.iter().enumerate() {
        if i > 0 {
            let p = coords[i - 1];
            total += (c.x - p.x).hypot(c.y - p.y);
        }
        out.push(total);
    }
    out
}

/// Unit tangent at vertex `index`, from its neighbours.
pub fn tangent_at(coords: &[Coord<f64>], index: usize) -> Result<Coord<f64>> {
    if coords.len() < 2 {
        return Err(ChannelError::DegenerateGeometry(
            "centreline has fewer than two points".into(),
        ));
    }
    let before = coords[index.saturating_sub(1)];
    let after = coords[(index + 1).min(coords.len() - 1)];
    let dx = after.x - before.x;
    let dy = after.y - before.y;
    let length = dx.hypot(dy);
    if !(length > f64::EPSILON) {
        return Err(ChannelError::DegenerateGeometry(format!(
            "zero-length segment at vertex {index} ({}, {})",
            coords[index].x, coords[index].y
        )));
    }
    Ok(coord! { x: dx / length, y: dy / length })
}

fn cubic_b_spline(controls: &[Coord<f64>], samples_per_span: usize) -> Vec<Coord<f64>> {
    if controls.len() < 3 {
        return controls.to_vec();
    }
    // Repeat the end points so the curve starts and ends on them
    let first = controls[0];
    let last = controls[controls.len() - 1];
    let padded: Vec<Coord<f64>> = [first, first]
        .into_iter()
        .chain(controls.iter().copied())
        .chain([last, last])
        .collect();

    let mut out = vec![first];
    for (index, span) in padded.windows(4).enumerate() {
        let start = usize::from(index == 0);
        for step in start..samples_per_span {
            let t = step as f64 / samples_per_span as f64;
            let t2 = t * t;
            let t3 = t2 * t;
            let b0 = (1.0 - t).powi(3) / 6.0;
            let b1 = (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0;
            let b2 = (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0;
            let b3 = t3 / 6.0;
            out.push(coord! {
                x: b0 * span[0].x + b1 * span[1].x + b2 * span[2].x + b3 * span[3].x,
                y: b0 * span[0].y + b1 * span[1].y + b2 * span[2].y + b3 * span[3].y,
            });
        }
    }
    out.push(last);
    out
}
