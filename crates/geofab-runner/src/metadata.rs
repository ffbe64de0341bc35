//! Run metadata written next to the stage artifacts.

use crate::config::Instructions;
use crate::stage_cache::{StageCache, StageRecord};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the metadata document in the cache directory.
pub const METADATA_DOCUMENT: &str = "metadata.json";

/// Which pipeline produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    Dem,
    River,
}

/// Provenance of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub package: String,
    pub version: String,
    pub pipeline: Pipeline,
    pub created: DateTime<Utc>,
    /// The instructions exactly as run.
    pub instructions: Instructions,
    /// Every stage in execution order and whether it was reused.
    pub stages: Vec<StageRecord>,
}

impl RunMetadata {
    pub fn new(pipeline: Pipeline, instructions: &Instructions, cache: &StageCache) -> Self {
        Self {
            package: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pipeline,
            created: Utc::now(),
            instructions: instructions.clone(),
            stages: cache.records().to_vec(),
        }
    }

    /// Number of stages loaded from the cache rather than computed.
    pub fn reused_stages(&self) -> usize {
        self.stages.iter().filter(|s| s.reused).count()
    }

    /// Write `metadata.json` into the cache directory, if it has one.
    pub fn write(&self, cache: &StageCache) -> Result<Option<PathBuf>> {
        cache.write_document(METADATA_DOCUMENT, self)
    }
}
