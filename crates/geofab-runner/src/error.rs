//! Error types for the pipeline runner.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while running a pipeline.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The instructions are incomplete or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An input document could not be read or parsed.
    #[error("Failed to load {}: {reason}", path.display())]
    Input {
        /// Path of the input document.
        path: PathBuf,
        /// Reason for failure.
        reason: String,
    },

    /// A stage finished without producing what a later stage needs.
    #[error("Stage '{stage}' produced no usable result: {reason}")]
    EmptyStage {
        /// Name of the stage.
        stage: String,
        /// What was missing.
        reason: String,
    },

    #[error("DEM error: {0}")]
    Dem(#[from] geofab_dem::DemError),

    #[error("Channel error: {0}")]
    Channel(#[from] geofab_channel::ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
