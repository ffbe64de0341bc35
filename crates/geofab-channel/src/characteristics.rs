//! Width, slope and windowed aggregates along an aligned channel.

use crate::channel::chainages;
use crate::transect::{sample_cross_sections, CrossSection, TransectParams};
use crate::Result;
use geo::{coord, Coord, LineString, Polygon};
use geofab_dem::ElevationGrid;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{info, warn};

/// Window lengths, in metres of chainage.
const WINDOW_0_25KM: f64 = 250.0;
const WINDOW_1KM: f64 = 1_000.0;
const WINDOW_2KM: f64 = 2_000.0;

/// Centred rolling aggregates at one sample, over valid samples only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowedMeans {
    /// Bed gradient fitted over 1 km.
    pub slope_mean_1km: Option<f64>,
    /// Bed gradient fitted over 2 km.
    pub slope_mean_2km: Option<f64>,
    /// Mean width over 250 m.
    pub widths_mean_0_25km: Option<f64>,
    /// Mean width over 1 km.
    pub widths_mean_1km: Option<f64>,
    /// Mean bank height over 250 m.
    pub thresholds_mean_0_25km: Option<f64>,
}

/// Per-sample channel characteristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSample {
    /// Arc length from the mouth.
    pub chainage: f64,
    /// Position on the aligned centreline.
    pub point: Coord<f64>,
    /// Whether the cross-section was valid.
    pub valid: bool,
    /// Number of channels crossed by the transect.
    pub channel_count: usize,
    /// Measured width.
    pub width: Option<f64>,
    /// Measured lower bank height.
    pub threshold: Option<f64>,
    /// Lowest ground elevation inside the channel.
    pub min_z_centre: Option<f64>,
    /// Windowed aggregates.
    pub means: WindowedMeans,
}

/// Characteristics of a whole channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCharacteristics {
    /// Samples, mouth first.
    pub samples: Vec<ChannelSample>,
    /// Channel outline from the smoothed widths, if at least two samples have one.
    pub river_polygon: Option<Polygon<f64>>,
}

/// Sample the aligned channel and derive per-sample characteristics.
pub fn estimate_width_and_slope(
    aligned: &LineString<f64>,
    ground: &ElevationGrid,
    vegetation: Option<&ElevationGrid>,
    params: &TransectParams,
) -> Result<ChannelCharacteristics> {
    let points: &[Coord<f64>] = &aligned.0;
    let sections = sample_cross_sections(points, &chainages(points), ground, vegetation, params)?;
    let valid = sections.iter().filter(|cs| cs.valid).count();
    if valid == 0 {
        warn!(samples = sections.len(), "No valid cross-sections on the aligned channel");
    }

    let samples: Vec<ChannelSample> = sections
        .iter()
        .map(|cs| ChannelSample {
            chainage: cs.chainage,
            point: cs.centre,
            valid: cs.valid,
            channel_count: cs.channel_count,
            width: cs.width,
            threshold: cs.threshold,
            min_z_centre: cs.min_z_centre,
            means: windowed_means(&sections, cs.chainage),
        })
        .collect();
    let river_polygon = river_polygon(&sections, &samples);

    info!(samples = samples.len(), valid, "Estimated channel width and slope");
    Ok(ChannelCharacteristics {
        samples,
        river_polygon,
    })
}

fn windowed_means(sections: &[CrossSection], at: f64) -> WindowedMeans {
    WindowedMeans {
        slope_mean_1km: windowed_slope(sections, at, WINDOW_1KM),
        slope_mean_2km: windowed_slope(sections, at, WINDOW_2KM),
        widths_mean_0_25km: windowed_mean(sections, at, WINDOW_0_25KM, |cs| cs.width),
        widths_mean_1km: windowed_mean(sections, at, WINDOW_1KM, |cs| cs.width),
        thresholds_mean_0_25km: windowed_mean(sections, at, WINDOW_0_25KM, |cs| cs.threshold),
    }
}

fn in_window(cs: &CrossSection, at: f64, window: f64) -> bool {
    cs.valid && (cs.chainage - at).abs() <= window / 2.0
}

fn windowed_mean(
    sections: &[CrossSection],
    at: f64,
    window: f64,
    value: impl Fn(&CrossSection) -> Option<f64>,
) -> Option<f64> {
    let values: Vec<f64> = sections
        .iter()
        .filter(|cs| in_window(cs, at, window))
        .filter_map(value)
        .collect();
    (!values.is_empty()).then(|| values.iter().mean())
}

/// Least-squares gradient of bed elevation against chainage.
///
/// The channel runs from the mouth upstream, so a bed that rises inland
/// has a positive slope.
fn windowed_slope(sections: &[CrossSection], at: f64, window: f64) -> Option<f64> {
    let (x, z): (Vec<f64>, Vec<f64>) = sections
        .iter()
        .filter(|cs| in_window(cs, at, window))
        .filter_map(|cs| cs.min_z_centre.map(|z| (cs.chainage, z)))
        .unzip();
    if x.len() < 2 {
        return None;
    }
    let variance = x.iter().variance();
    if !(variance > 0.0) {
        return None;
    }
    Some(x.iter().covariance(z.iter()) / variance)
}

/// Outline of the channel built from the smoothed widths.
fn river_polygon(sections: &[CrossSection], samples: &[ChannelSample]) -> Option<Polygon<f64>> {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for (cs, sample) in sections.iter().zip(samples) {
        let Some(width) = sample.means.widths_mean_0_25km else {
            continue;
        };
        let half = width / 2.0;
        left.push(coord! { x: cs.centre.x + half * cs.normal.x, y: cs.centre.y + half * cs.normal.y });
        right.push(coord! { x: cs.centre.x - half * cs.normal.x, y: cs.centre.y - half * cs.normal.y });
    }
    if left.len() < 2 {
        return None;
    }
    right.reverse();
    left.extend(right);
    Some(Polygon::new(LineString::from(left), vec![]))
}
