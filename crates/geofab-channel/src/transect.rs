//! Cross-sections perpendicular to a centreline and bank detection.
//!
//! Each cross-section samples the ground DEM (and, when available, the
//! vegetation DEM) at regular offsets across the channel. Offsets are
//! positive to the left of the downstream-to-upstream direction of travel.
//!
//! Bank detection works on the bank profile, the larger of the ground and
//! vegetation elevations at each offset:
//! 1. `z_min` is the lowest ground elevation within `search_radius` of the centreline.
//! 2. Samples below `z_min + threshold` form runs; each run is a candidate channel.
//! 3. The longest run is the channel, bounded by the first samples above the threshold.
//!
//! A cross-section is invalid if the channel run reaches either end of the
//! transect, if more than one run is found, if it is narrower than the
//! minimum width, or if its lower bank is higher than the allowed height.

use crate::channel::tangent_at;
use crate::Result;
use geo::{coord, Coord};
use geofab_dem::ElevationGrid;
use serde::{Deserialize, Serialize};

/// Parameters of cross-section sampling and bank detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransectParams {
    /// Spacing of samples across the transect.
    pub sample_spacing: f64,
    /// Half-length of the transect.
    pub radius: f64,
    /// Half-width of the band in which the channel bed is searched for.
    pub search_radius: f64,
    /// Height above the bed below which a sample is in the channel.
    pub threshold: f64,
    /// Narrowest width accepted as a channel.
    pub min_channel_width: f64,
    /// Highest lower-bank height accepted, if limited.
    pub max_bank_height: Option<f64>,
}

/// Bank positions found on one transect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Banks {
    /// Offset of the first in-channel sample on the right.
    pub right_offset: f64,
    /// Offset of the last in-channel sample on the left.
    pub left_offset: f64,
    /// Bank-profile elevation just outside the right edge.
    pub right_height: f64,
    /// Bank-profile elevation just outside the left edge.
    pub left_height: f64,
}

impl Banks {
    /// Channel width between the bank edges.
    pub fn width(&self, sample_spacing: f64) -> f64 {
        self.left_offset - self.right_offset + sample_spacing
    }

    /// Offset of the channel centre from the transect centre.
    pub fn centre_offset(&self) -> f64 {
        0.5 * (self.left_offset + self.right_offset)
    }
}

/// One sampled cross-section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSection {
    /// Arc length from the mouth.
    pub chainage: f64,
    /// Centreline point the transect is centred on.
    pub centre: Coord<f64>,
    /// Unit normal pointing to positive offsets.
    pub normal: Coord<f64>,
    /// Ground elevations from `-radius` to `radius`.
    pub ground: Vec<Option<f64>>,
    /// Lowest ground elevation within the search radius.
    pub min_z: Option<f64>,
    /// Lowest ground elevation inside the detected channel.
    pub min_z_centre: Option<f64>,
    /// Detected banks, if the channel run is bounded on both sides.
    pub banks: Option<Banks>,
    /// Number of disjoint runs below the threshold.
    pub channel_count: usize,
    /// Channel width.
    pub width: Option<f64>,
    /// Lower bank height above `min_z`.
    pub threshold: Option<f64>,
    /// Whether the cross-section can be trusted.
    pub valid: bool,
}

impl CrossSection {
    /// Position of the detected channel centre.
    pub fn channel_centre(&self) -> Option<Coord<f64>> {
        let offset = self.banks?.centre_offset();
        Some(coord! {
            x: self.centre.x + offset * self.normal.x,
            y: self.centre.y + offset * self.normal.y,
        })
    }
}

/// Offsets of the samples across a transect, from `-radius` to `radius`.
pub fn sample_offsets(params: &TransectParams) -> Vec<f64> {
    let half = (params.radius / params.sample_spacing).floor() as isize;
    (-half..=half).map(|k| k as f64 * params.sample_spacing).collect()
}

/// Sample a cross-section at every centreline point.
///
/// `chainages` must be the arc length of each centreline point. Tangents
/// are taken from neighbouring points, so a repeated vertex is an error.
pub fn sample_cross_sections(
    centreline: &[Coord<f64>],
    chainages: &[f64],
    ground: &ElevationGrid,
    vegetation: Option<&ElevationGrid>,
    params: &TransectParams,
) -> Result<Vec<CrossSection>> {
    let offsets = sample_offsets(params);
    centreline
        .iter()
        .enumerate()
        .map(|(i, centre)| {
            let tangent = tangent_at(centreline, i)?;
            let normal = coord! { x: -tangent.y, y: tangent.x };
            let at = |dem: &ElevationGrid, s: f64| dem.sample(centre.x + s * normal.x, centre.y + s * normal.y);
            let ground_profile: Vec<Option<f64>> = offsets.iter().map(|s| at(ground, *s)).collect();
            let bank_profile: Vec<Option<f64>> = match vegetation {
                Some(veg) => offsets
                    .iter()
                    .zip(&ground_profile)
                    .map(|(s, g)| match (*g, at(veg, *s)) {
                        (Some(g), Some(v)) => Some(g.max(v)),
                        (g, v) => g.or(v),
                    })
                    .collect(),
                None => ground_profile.clone(),
            };
            Ok(detect_banks(
                chainages.get(i).copied().unwrap_or_default(),
                *centre,
                normal,
                &offsets,
                ground_profile,
                &bank_profile,
                params,
            ))
        })
        .collect()
}

/// Classify one cross-section from its sampled profiles.
pub fn detect_banks(
    chainage: f64,
    centre: Coord<f64>,
    normal: Coord<f64>,
    offsets: &[f64],
    ground: Vec<Option<f64>>,
    bank_profile: &[Option<f64>],
    params: &TransectParams,
) -> CrossSection {
    let min_z = offsets
        .iter()
        .zip(&ground)
        .filter(|(s, _)| s.abs() <= params.search_radius + 1e-9)
        .filter_map(|(_, z)| *z)
        .reduce(f64::min);

    let mut section = CrossSection {
        chainage,
        centre,
        normal,
        ground,
        min_z,
        min_z_centre: min_z,
        banks: None,
        channel_count: 0,
        width: None,
        threshold: None,
        valid: false,
    };
    let Some(z_min) = min_z else {
        return section;
    };

    let below: Vec<bool> = bank_profile
        .iter()
        .map(|z| z.is_some_and(|z| z < z_min + params.threshold))
        .collect();
    let runs = below_threshold_runs(&below);
    section.channel_count = runs.len();

    let Some(&(start, end)) = runs
        .iter()
        .max_by(|a, b| (a.1 - a.0).cmp(&(b.1 - b.0)).then(b.0.cmp(&a.0)))
    else {
        return section;
    };
    if start == 0 || end + 1 >= below.len() {
        return section;
    }
    let (Some(right_height), Some(left_height)) = (bank_profile[start - 1], bank_profile[end + 1])
    else {
        return section;
    };

    let banks = Banks {
        right_offset: offsets[start],
        left_offset: offsets[end],
        right_height,
        left_height,
    };
    let width = banks.width(params.sample_spacing);
    let threshold = right_height.min(left_height) - z_min;

    section.min_z_centre = section.ground[start..=end].iter().filter_map(|z| *z).reduce(f64::min);
    section.banks = Some(banks);
    section.width = Some(width);
    section.threshold = Some(threshold);
    section.valid = section.channel_count == 1
        && width >= params.min_channel_width
        && params.max_bank_height.map_or(true, |max| threshold <= max);
    section
}

/// Inclusive `(start, end)` index ranges of consecutive `true` values.
fn below_threshold_runs(below: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, b) in below.iter().enumerate() {
        match (start, *b) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                runs.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, below.len() - 1));
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TransectParams {
        TransectParams {
            sample_spacing: 1.0,
            radius: 10.0,
            search_radius: 5.0,
            threshold: 0.5,
            min_channel_width: 2.0,
            max_bank_height: None,
        }
    }

    fn classify(profile: &[f64], params: &TransectParams) -> CrossSection {
        let offsets = sample_offsets(params);
        assert_eq!(offsets.len(), profile.len());
        let ground: Vec<Option<f64>> = profile.iter().copied().map(Some).collect();
        detect_banks(
            0.0,
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 0.0, y: 1.0 },
            &offsets,
            ground.clone(),
            &ground,
            params,
        )
    }

    /// 21 samples at 1 m spacing, dipping to `depth` at the given offsets.
    fn profile_with_dips(dips: &[std::ops::RangeInclusive<i32>], depth: f64) -> Vec<f64> {
        (-10..=10)
            .map(|s| if dips.iter().any(|d| d.contains(&s)) { depth } else { 2.0 })
            .collect()
    }

    #[test]
    fn test_single_channel_is_valid() {
        let section = classify(&profile_with_dips(&[-2..=2], 0.0), &params());
        assert!(section.valid);
        assert_eq!(section.channel_count, 1);
        assert_eq!(section.width, Some(5.0));
        assert_eq!(section.threshold, Some(2.0));
        assert_eq!(section.min_z_centre, Some(0.0));
        let banks = section.banks.expect("banks");
        assert_eq!(banks.centre_offset(), 0.0);
    }

    #[test]
    fn test_braided_transect_is_invalid() {
        let section = classify(&profile_with_dips(&[-4..=-2, 2..=5], 0.0), &params());
        assert_eq!(section.channel_count, 2);
        assert!(!section.valid);
        // The larger run still defines the banks
        let banks = section.banks.expect("banks");
        assert_eq!(banks.right_offset, 2.0);
        assert_eq!(banks.left_offset, 5.0);
    }

    #[test]
    fn test_unbounded_run_is_invalid() {
        let section = classify(&profile_with_dips(&[-10..=3], 0.0), &params());
        assert!(!section.valid);
        assert!(section.banks.is_none());
    }

    #[test]
    fn test_narrow_channel_is_invalid() {
        let section = classify(&profile_with_dips(&[0..=0], 0.0), &params());
        assert_eq!(section.width, Some(1.0));
        assert!(!section.valid);
    }

    #[test]
    fn test_high_bank_is_invalid() {
        let limited = TransectParams {
            max_bank_height: Some(1.5),
            ..params()
        };
        let section = classify(&profile_with_dips(&[-2..=2], 0.0), &limited);
        assert!(!section.valid);
        assert_eq!(section.threshold, Some(2.0));
    }

    #[test]
    fn test_vegetation_raises_banks() {
        let p = params();
        let offsets = sample_offsets(&p);
        let ground: Vec<Option<f64>> = profile_with_dips(&[-4..=4], 0.0).into_iter().map(Some).collect();
        // Vegetation on both sides of a narrower core channel
        let bank: Vec<Option<f64>> = offsets
            .iter()
            .zip(&ground)
            .map(|(s, g)| if s.abs() >= 2.0 { Some(3.0) } else { *g })
            .collect();
        let section = detect_banks(
            0.0,
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 1.0, y: 0.0 },
            &offsets,
            ground,
            &bank,
            &p,
        );
        assert_eq!(section.width, Some(3.0));
        assert_eq!(section.threshold, Some(3.0));
    }

    #[test]
    fn test_missing_ground_near_centre() {
        let p = params();
        let offsets = sample_offsets(&p);
        let ground = vec![None; offsets.len()];
        let section = detect_banks(0.0, coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 0.0 }, &offsets, ground.clone(), &ground, &p);
        assert!(section.min_z.is_none());
        assert!(!section.valid);
    }
}
