//! Empirical depth models and river-bed elevation estimates.
//!
//! Two models convert flow, slope and width into a depth:
//! - Neal et al. (Manning's equation for a wide rectangular channel):
//!   `d = (n Q / (sqrt(S) W))^(3/5)`
//! - Smart et al. (power law):
//!   `d = (Q / (K0 W S^b))^(1 / (1 + a))` with `a = 0.745`, `b = 0.305`, `K0 = 6.16`
//!
//! The measured bank height is subtracted from each depth (clamped at
//! zero) and the bed elevation is the channel minimum less that depth.

use crate::channel::Channel;
use crate::characteristics::ChannelSample;
use crate::{ChannelError, Result};
use geo::Coord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Hydraulic inputs to a depth model at one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HydraulicInputs {
    /// Flow rate (m^3/s).
    pub flow: f64,
    /// Manning's roughness coefficient.
    pub mannings_n: f64,
    /// Bed slope (m/m).
    pub slope: f64,
    /// Channel width (m).
    pub width: f64,
}

impl HydraulicInputs {
    fn is_physical(&self) -> bool {
        self.flow >= 0.0
            && self.slope > 0.0
            && self.width > 0.0
            && self.flow.is_finite()
            && self.slope.is_finite()
            && self.width.is_finite()
    }
}

/// A model estimating channel depth from hydraulic inputs.
pub trait DepthModel {
    /// Name used in logs and output columns.
    fn name(&self) -> &'static str;

    /// Flow depth, `None` for non-physical inputs.
    fn depth(&self, inputs: &HydraulicInputs) -> Option<f64>;
}

/// Manning's-equation depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct NealEtAl;

impl DepthModel for NealEtAl {
    fn name(&self) -> &'static str {
        "Neal_et_al"
    }

    fn depth(&self, inputs: &HydraulicInputs) -> Option<f64> {
        if !inputs.is_physical() || !(inputs.mannings_n >= 0.0) {
            return None;
        }
        let depth = (inputs.mannings_n * inputs.flow / (inputs.slope.sqrt() * inputs.width)).powf(3.0 / 5.0);
        depth.is_finite().then_some(depth)
    }
}

/// Power-law depth.
#[derive(Debug, Clone, Copy)]
pub struct SmartEtAl {
    /// Depth exponent term.
    pub a: f64,
    /// Slope exponent.
    pub b: f64,
    /// Coefficient.
    pub k0: f64,
}

impl Default for SmartEtAl {
    fn default() -> Self {
        Self {
            a: 0.745,
            b: 0.305,
            k0: 6.16,
        }
    }
}

impl DepthModel for SmartEtAl {
    fn name(&self) -> &'static str {
        "Smart_et_al"
    }

    fn depth(&self, inputs: &HydraulicInputs) -> Option<f64> {
        if !inputs.is_physical() {
            return None;
        }
        let depth = (inputs.flow / (self.k0 * inputs.width * inputs.slope.powf(self.b)))
            .powf(1.0 / (1.0 + self.a));
        depth.is_finite().then_some(depth)
    }
}

/// Flow and roughness for one reach.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowEntry {
    /// Reach identifier.
    #[serde(alias = "nzsegment")]
    pub reach_id: i64,
    /// Flow rate (m^3/s).
    pub flow: f64,
    /// Manning's roughness coefficient.
    #[serde(alias = "n")]
    pub mannings_n: f64,
}

/// Flow table keyed by reach identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowTable {
    entries: BTreeMap<i64, FlowEntry>,
}

impl FlowTable {
    /// Build a table; later rows replace earlier rows for the same reach.
    pub fn new(rows: impl IntoIterator<Item = FlowEntry>) -> Self {
        Self {
            entries: rows.into_iter().map(|e| (e.reach_id, e)).collect(),
        }
    }

    /// Entry for a reach, or a missing-coefficient error.
    pub fn get(&self, reach_id: i64) -> Result<&FlowEntry> {
        self.entries
            .get(&reach_id)
            .ok_or(ChannelError::MissingCoefficient { reach_id })
    }

    /// Number of reaches in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Depth and bed elevation estimated at one channel sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BedElevationEstimate {
    /// Position on the aligned centreline.
    pub point: Coord<f64>,
    /// Arc length from the mouth.
    pub chainage: f64,
    /// Reach the sample was joined to.
    pub reach_id: i64,
    /// Smoothed width used by the models.
    pub width: f64,
    /// Water depth below the banks from Neal et al.
    pub depth_neal_et_al: f64,
    /// Water depth below the banks from Smart et al.
    pub depth_smart_et_al: f64,
    /// Bed elevation from Neal et al.
    pub bed_elevation_neal_et_al: f64,
    /// Bed elevation from Smart et al.
    pub bed_elevation_smart_et_al: f64,
}

/// Water depth after removing the bank height, clamped at zero.
pub fn water_depth(depth: f64, threshold: f64) -> f64 {
    (depth - threshold).max(0.0)
}

/// Estimate bed elevations for every sample with complete inputs.
///
/// Every sample is joined to the nearest reach first, so a reach missing
/// from the flow table fails the whole estimate even if its samples lack
/// other inputs.
pub fn estimate_bed_elevations(
    samples: &[ChannelSample],
    channel: &Channel,
    flows: &FlowTable,
) -> Result<Vec<BedElevationEstimate>> {
    let neal = NealEtAl;
    let smart = SmartEtAl::default();
    let mut estimates = Vec::new();

    for sample in samples {
        let reach_id = channel
            .nearest_reach(sample.point)
            .ok_or_else(|| ChannelError::DegenerateGeometry("channel has no reaches".into()))?;
        let entry = flows.get(reach_id)?;

        let means = &sample.means;
        let (Some(slope), Some(width), Some(threshold), Some(min_z)) = (
            means.slope_mean_2km,
            means.widths_mean_0_25km,
            means.thresholds_mean_0_25km,
            sample.min_z_centre,
        ) else {
            continue;
        };
        let inputs = HydraulicInputs {
            flow: entry.flow,
            mannings_n: entry.mannings_n,
            slope,
            width,
        };
        let (Some(d_neal), Some(d_smart)) = (neal.depth(&inputs), smart.depth(&inputs)) else {
            debug!(chainage = sample.chainage, slope, width, "Non-physical inputs; skipping sample");
            continue;
        };
        let depth_neal_et_al = water_depth(d_neal, threshold);
        let depth_smart_et_al = water_depth(d_smart, threshold);

        estimates.push(BedElevationEstimate {
            point: sample.point,
            chainage: sample.chainage,
            reach_id,
            width,
            depth_neal_et_al,
            depth_smart_et_al,
            bed_elevation_neal_et_al: min_z - depth_neal_et_al,
            bed_elevation_smart_et_al: min_z - depth_smart_et_al,
        });
    }

    info!(
        samples = samples.len(),
        estimates = estimates.len(),
        "Estimated river bed elevations"
    );
    Ok(estimates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Reach, ReachNetwork};
    use crate::characteristics::WindowedMeans;
    use crate::fan::mouth_estimate;
    use approx::assert_relative_eq;
    use geo::{coord, LineString};

    #[test]
    fn test_neal_closed_form() {
        let inputs = HydraulicInputs {
            flow: 100.0,
            mannings_n: 0.04,
            slope: 0.0016,
            width: 20.0,
        };
        // 0.04 * 100 / (0.04 * 20) = 5
        assert_relative_eq!(NealEtAl.depth(&inputs).expect("depth"), 5.0_f64.powf(0.6), max_relative = 1e-12);
    }

    #[test]
    fn test_non_physical_inputs() {
        let base = HydraulicInputs {
            flow: 10.0,
            mannings_n: 0.03,
            slope: 0.001,
            width: 10.0,
        };
        for inputs in [
            HydraulicInputs { slope: 0.0, ..base },
            HydraulicInputs { slope: -0.01, ..base },
            HydraulicInputs { width: 0.0, ..base },
        ] {
            assert!(NealEtAl.depth(&inputs).is_none());
            assert!(SmartEtAl::default().depth(&inputs).is_none());
        }
    }

    #[test]
    fn test_depths_non_negative_over_parameter_grid() {
        let smart = SmartEtAl::default();
        for flow in [0.0, 0.5, 5.0, 50.0, 500.0, 5000.0] {
            for mannings_n in [0.01, 0.03, 0.06, 0.1] {
                for slope in [1e-5, 1e-4, 1e-3, 1e-2, 0.1] {
                    for width in [1.0, 5.0, 20.0, 100.0, 500.0] {
                        let inputs = HydraulicInputs {
                            flow,
                            mannings_n,
                            slope,
                            width,
                        };
                        let neal = NealEtAl.depth(&inputs).expect("neal depth");
                        let smart = smart.depth(&inputs).expect("smart depth");
                        assert!(neal >= 0.0, "{inputs:?}");
                        assert!(smart >= 0.0, "{inputs:?}");
                        for threshold in [0.0, 0.5, 10.0] {
                            assert!(water_depth(neal, threshold) >= 0.0);
                            assert!(water_depth(smart, threshold) >= 0.0);
                        }
                    }
                }
            }
        }
    }

    fn channel() -> Channel {
        let network = ReachNetwork::new(vec![
            Reach {
                id: 10,
                geometry: LineString::from(vec![(0.0, 1000.0), (0.0, 0.0)]),
                area: 100.0,
            },
            Reach {
                id: 11,
                geometry: LineString::from(vec![(0.0, 2000.0), (0.0, 1000.0)]),
                area: 90.0,
            },
        ]);
        Channel::from_rec(&network, 10, 10.0, 0.0).expect("channel")
    }

    fn sample(y: f64) -> ChannelSample {
        ChannelSample {
            chainage: y,
            point: coord! { x: 0.0, y: y },
            valid: true,
            channel_count: 1,
            width: Some(10.0),
            threshold: Some(0.5),
            min_z_centre: Some(2.0),
            means: WindowedMeans {
                slope_mean_1km: Some(0.001),
                slope_mean_2km: Some(0.001),
                widths_mean_0_25km: Some(10.0),
                widths_mean_1km: Some(10.0),
                thresholds_mean_0_25km: Some(0.5),
            },
        }
    }

    #[test]
    fn test_bed_elevation_joins_nearest_reach() {
        let flows = FlowTable::new([
            FlowEntry {
                reach_id: 10,
                flow: 20.0,
                mannings_n: 0.03,
            },
            FlowEntry {
                reach_id: 11,
                flow: 15.0,
                mannings_n: 0.03,
            },
        ]);
        let estimates = estimate_bed_elevations(&[sample(100.0), sample(1500.0)], &channel(), &flows)
            .expect("estimates");
        assert_eq!(estimates.len(), 2);
        assert_eq!(estimates[0].reach_id, 10);
        assert_eq!(estimates[1].reach_id, 11);

        let inputs = HydraulicInputs {
            flow: 20.0,
            mannings_n: 0.03,
            slope: 0.001,
            width: 10.0,
        };
        let expected = 2.0 - water_depth(NealEtAl.depth(&inputs).expect("depth"), 0.5);
        assert_relative_eq!(estimates[0].bed_elevation_neal_et_al, expected);
        assert!(estimates[0].bed_elevation_smart_et_al <= 2.0);
    }

    #[test]
    fn test_missing_flow_entry_is_an_error() {
        let flows = FlowTable::new([FlowEntry {
            reach_id: 10,
            flow: 20.0,
            mannings_n: 0.03,
        }]);
        let result = estimate_bed_elevations(&[sample(100.0), sample(1500.0)], &channel(), &flows);
        assert!(matches!(
            result,
            Err(ChannelError::MissingCoefficient { reach_id: 11 })
        ));
    }

    #[test]
    fn test_mouth_estimate_skips_sample_without_means() {
        let flows = FlowTable::new([FlowEntry {
            reach_id: 10,
            flow: 20.0,
            mannings_n: 0.03,
        }]);
        let mut mouth = sample(0.0);
        mouth.means.slope_mean_2km = None;
        let estimates = estimate_bed_elevations(&[mouth, sample(20.0), sample(40.0)], &channel(), &flows)
            .expect("estimates");
        assert_eq!(estimates.len(), 2);

        let nearest = mouth_estimate(&estimates, 100.0).expect("nearest estimate");
        assert_eq!(nearest.chainage, 20.0);
        assert_eq!(nearest.bed_elevation_smart_et_al, estimates[0].bed_elevation_smart_et_al);

        let result = mouth_estimate(&estimates, 10.0);
        assert!(matches!(
            result,
            Err(ChannelError::NoMouthEstimate { max_distance }) if max_distance == 10.0
        ));
        assert!(matches!(
            mouth_estimate(&[], 100.0),
            Err(ChannelError::NoMouthEstimate { .. })
        ));
    }
}
