//! Error types for channel analysis.

use thiserror::Error;

/// Errors that can occur while extracting or characterising a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The requested reach is not in the network.
    #[error("Reach {0} not found in the network")]
    ReachNotFound(i64),

    /// A centreline that cannot be sampled (zero-length segment, too few points).
    #[error("Degenerate channel geometry: {0}")]
    DegenerateGeometry(String),

    /// A reach has no entry in the flow table.
    #[error("No flow or roughness coefficient for reach {reach_id}")]
    MissingCoefficient {
        /// Reach identifier that failed to join.
        reach_id: i64,
    },

    /// No ocean contour deep enough intersects the river-mouth fan.
    #[error("No ocean contour deeper than {min_depth} m intersects the river-mouth fan")]
    NoMatchingContour {
        /// Depth a contour must exceed.
        min_depth: f64,
    },

    /// No bed elevation estimate close enough to the river mouth.
    #[error("No bed elevation estimate within {max_distance} m of the river mouth")]
    NoMouthEstimate {
        /// Furthest chainage accepted for the mouth estimate.
        max_distance: f64,
    },

    /// Error from the DEM crate.
    #[error("DEM error: {0}")]
    Dem(#[from] geofab_dem::DemError),
}
