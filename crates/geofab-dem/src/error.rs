//! Error types for the DEM crate.

use thiserror::Error;

/// Errors that can occur while building or interpolating a DEM.
#[derive(Debug, Error)]
pub enum DemError {
    /// The output resolution must be a positive, finite cell size.
    #[error("Invalid grid resolution: {0} (must be positive and finite)")]
    InvalidResolution(f64),

    /// The catchment boundary has no area, so no grid can be derived from it.
    #[error("Catchment boundary is empty or has zero area")]
    EmptyCatchment,

    /// The requested degree of parallelism is not usable.
    #[error("Invalid number of cores: {0} (must be at least 1)")]
    InvalidParallelism(usize),

    /// The rayon worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A point-cloud tile could not be read by its source.
    #[error("Failed to read point-cloud tile {tile}: {reason}")]
    TileRead {
        /// Tile identifier (usually a file path).
        tile: String,
        /// Reason for failure.
        reason: String,
    },

    /// A depth contour is missing the named depth attribute.
    #[error("Contour {index} has no depth attribute '{label}'")]
    MissingDepthAttribute {
        /// Index of the contour in its collection.
        index: usize,
        /// Name of the attribute that was requested.
        label: String,
    },

    /// Two grids that must share a layout do not.
    #[error("Grid layout mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    GridMismatch {
        /// Expected number of columns.
        expected_width: usize,
        /// Expected number of rows.
        expected_height: usize,
        /// Actual number of columns.
        width: usize,
        /// Actual number of rows.
        height: usize,
    },

    /// I/O error reading a raster file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing required tags.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),
}
