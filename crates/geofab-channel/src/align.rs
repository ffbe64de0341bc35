//! Snapping a seed centreline onto the channel seen in the DEM.

use crate::channel::chainages;
use crate::transect::{sample_cross_sections, CrossSection, TransectParams};
use crate::Result;
use geo::{coord, Coord, LineString};
use geofab_dem::ElevationGrid;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Parameters of channel alignment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignParams {
    /// Cross-section sampling and bank detection.
    pub transect: TransectParams,
    /// Smoothing window in multiples of the mean valid channel width.
    pub width_centre_smoothing: f64,
}

/// An aligned centreline and the cross-sections it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedChannel {
    /// Aligned centreline, mouth first.
    pub line: LineString<f64>,
    /// Cross-sections sampled on the seed centreline.
    pub cross_sections: Vec<CrossSection>,
}

/// Odd smoothing window, in samples, for a mean width.
pub fn smoothing_window(multiplier: f64, mean_width: f64, spacing: f64) -> usize {
    let samples = (multiplier * mean_width / spacing).round().max(1.0) as usize;
    if samples % 2 == 0 {
        samples + 1
    } else {
        samples
    }
}

/// Validity-weighted centred moving average; `None` where no valid value is in the window.
pub fn weighted_moving_average(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(values.len().saturating_sub(1));
            let (sum, count) = values[lo..=hi]
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}

/// Move each seed point across the channel by its smoothed centre offset.
///
/// Only valid cross-sections contribute offsets. Points with no valid
/// cross-section within the smoothing window stay where they are.
pub fn align_channel(
    seed: &LineString<f64>,
    ground: &ElevationGrid,
    vegetation: Option<&ElevationGrid>,
    spacing: f64,
    params: &AlignParams,
) -> Result<AlignedChannel> {
    let points: &[Coord<f64>] = &seed.0;
    let cross_sections = sample_cross_sections(points, &chainages(points), ground, vegetation, &params.transect)?;

    let offsets: Vec<Option<f64>> = cross_sections
        .iter()
        .map(|cs| cs.banks.filter(|_| cs.valid).map(|b| b.centre_offset()))
        .collect();
    let widths: Vec<f64> = cross_sections
        .iter()
        .filter(|cs| cs.valid)
        .filter_map(|cs| cs.width)
        .collect();
    if widths.is_empty() {
        warn!(
            samples = cross_sections.len(),
            "No valid cross-sections; keeping the seed centreline"
        );
        return Ok(AlignedChannel {
            line: seed.clone(),
            cross_sections,
        });
    }

    let mean_width = widths.iter().sum::<f64>() / widths.len() as f64;
    let window = smoothing_window(params.width_centre_smoothing, mean_width, spacing);
    let smoothed = weighted_moving_average(&offsets, window);

    let line: LineString<f64> = cross_sections
        .iter()
        .zip(&smoothed)
        .map(|(cs, offset)| {
            let offset = offset.unwrap_or(0.0);
            coord! {
                x: cs.centre.x + offset * cs.normal.x,
                y: cs.centre.y + offset * cs.normal.y,
            }
        })
        .collect::<Vec<_>>()
        .into();

    info!(
        samples = cross_sections.len(),
        valid = widths.len(),
        mean_width,
        window,
        "Aligned channel centreline"
    );
    Ok(AlignedChannel {
        line,
        cross_sections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Rect;
    use geofab_dem::{CellSource, GridSpec};

    #[test]
    fn test_smoothing_window_is_odd() {
        assert_eq!(smoothing_window(1.0, 10.0, 5.0), 3);
        assert_eq!(smoothing_window(2.0, 10.0, 5.0), 5);
        assert_eq!(smoothing_window(0.0, 10.0, 5.0), 1);
    }

    #[test]
    fn test_moving_average_skips_invalid() {
        let smoothed = weighted_moving_average(&[Some(1.0), None, Some(3.0), None, None], 3);
        assert_eq!(smoothed, vec![Some(1.0), Some(2.0), Some(3.0), Some(3.0), None]);
    }

    /// A straight east-west channel 6 m wide centred on `y = centre_y`.
    fn valley(centre_y: f64) -> ElevationGrid {
        let spec = GridSpec::covering(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 100.0, y: 60.0 }), 1.0)
            .expect("spec");
        let values = (0..spec.len())
            .map(|i| {
                let (row, col) = spec.row_col(i);
                let c = spec.cell_centre(row, col);
                if (c.y - centre_y).abs() < 3.0 { 0.0 } else { 2.0 }
            })
            .collect();
        ElevationGrid::from_values(spec, values, CellSource::Lidar).expect("grid")
    }

    fn params() -> AlignParams {
        AlignParams {
            transect: TransectParams {
                sample_spacing: 1.0,
                radius: 20.0,
                search_radius: 10.0,
                threshold: 0.5,
                min_channel_width: 2.0,
                max_bank_height: None,
            },
            width_centre_smoothing: 1.0,
        }
    }

    #[test]
    fn test_offset_seed_moves_to_channel() {
        let dem = valley(30.5);
        // Seed runs 4 m north of the channel, mouth at the east end
        let seed: LineString<f64> = (0..=16).map(|i| (90.0 - 5.0 * i as f64, 34.5)).collect::<Vec<_>>().into();
        let aligned = align_channel(&seed, &dem, None, 5.0, &params()).expect("align");
        assert!(aligned.cross_sections.iter().all(|cs| cs.valid));
        for c in &aligned.line.0 {
            assert_relative_eq!(c.y, 30.5, epsilon = 1e-9);
        }
        assert_relative_eq!(aligned.line.0[0].x, 90.0);
    }

    #[test]
    fn test_no_valid_sections_keeps_seed() {
        let spec = GridSpec::covering(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 100.0, y: 60.0 }), 1.0)
            .expect("spec");
        let flat = ElevationGrid::from_values(spec, vec![1.0; spec.len()], CellSource::Lidar).expect("grid");
        let seed: LineString<f64> = vec![(10.0, 30.0), (20.0, 30.0), (30.0, 30.0)].into();
        let aligned = align_channel(&seed, &flat, None, 10.0, &params()).expect("align");
        assert_eq!(aligned.line, seed);
    }
}
