//! # geofab-channel
//!
//! River channel characterisation for DEM bathymetry.
//!
//! This crate turns a coarse river network into bed-elevation estimates
//! that the DEM crate can interpolate into a river polygon:
//!
//! - **Extraction**: [`Channel::from_rec`] traces the main stem upstream
//!   from a reach and fits a smoothed centreline.
//! - **Alignment**: [`align_channel`] samples perpendicular transects of
//!   the ground (and vegetation) DEM and moves each centreline point onto
//!   the detected channel centre.
//! - **Characteristics**: [`estimate_width_and_slope`] measures width,
//!   bank height and bed slope, with windowed means that suppress LiDAR
//!   noise.
//! - **Depth**: [`estimate_bed_elevations`] joins a flow table and applies
//!   the [`NealEtAl`] and [`SmartEtAl`] depth models.
//! - **Fan**: [`RiverMouthFan`] extends the channel offshore to the
//!   nearest sufficiently deep ocean contour.

mod align;
mod channel;
mod characteristics;
mod depth;
mod error;
mod fan;
mod transect;

pub use align::{align_channel, smoothing_window, weighted_moving_average, AlignParams, AlignedChannel};
pub use channel::{chainages, resample, tangent_at, Channel, Reach, ReachNetwork, CONNECTIVITY_TOLERANCE};
pub use characteristics::{estimate_width_and_slope, ChannelCharacteristics, ChannelSample, WindowedMeans};
pub use depth::{
    estimate_bed_elevations, water_depth, BedElevationEstimate, DepthModel, FlowEntry, FlowTable,
    HydraulicInputs, NealEtAl, SmartEtAl,
};
pub use error::ChannelError;
pub use fan::{
    mouth_estimate, FanParams, RiverMouthFan, DEPTH_MULTIPLIER, FAN_ANGLE_DEGREES, FAN_LENGTH, MOUTH_SEARCH_SAMPLES,
};
pub use transect::{detect_banks, sample_cross_sections, sample_offsets, Banks, CrossSection, TransectParams};

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
