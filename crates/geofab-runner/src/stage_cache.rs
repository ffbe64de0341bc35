//! Explicit stage-result cache.
//!
//! A stage result is stored under the stage name together with a
//! [`Fingerprint`] of everything that produced it: the stage name, its
//! parameters, the contents of its input files and the fingerprints of the
//! stages it consumed. A stored result is reused only when the fingerprint
//! matches, so editing an input or a parameter re-runs exactly the stages
//! downstream of it.
//!
//! Results are written to `<stage>.json` in the cache directory through a
//! temporary file and a rename, and only after the stage has finished. A
//! stage that fails leaves no artifact behind.

use crate::{Result, RunnerError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// SHA-256 digest identifying a stage result, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Start a fingerprint for a stage.
    pub fn builder(stage: &str) -> FingerprintBuilder {
        let mut hasher = Sha256::new();
        hasher.update(b"stage\0");
        hasher.update(stage.as_bytes());
        FingerprintBuilder { hasher }
    }

    /// Full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex digits, for log messages.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accumulates the parameters and inputs of a stage.
///
/// Every item is length-prefixed so adjacent items cannot run into each
/// other; the order in which items are added matters.
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    fn item(&mut self, kind: &[u8], name: &str, bytes: &[u8]) {
        self.hasher.update(kind);
        self.hasher.update((name.len() as u64).to_le_bytes());
        self.hasher.update(name.as_bytes());
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    /// Add a named parameter, hashed through its JSON form.
    pub fn param<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(value)?;
        self.item(b"param\0", name, &bytes);
        Ok(self)
    }

    /// Add the result of an upstream stage.
    pub fn input(mut self, upstream: &Fingerprint) -> Self {
        self.item(b"input\0", "", upstream.as_str().as_bytes());
        self
    }

    /// Add the contents of an input file.
    pub fn file(mut self, path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| RunnerError::Input {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut content = Sha256::new();
        std::io::copy(&mut file, &mut content)?;
        let digest = content.finalize();
        self.item(b"file\0", &path.to_string_lossy(), &digest);
        Ok(self)
    }

    /// Finish the digest.
    pub fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.hasher.finalize()))
    }
}

/// What happened to a stage during this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub fingerprint: Fingerprint,
    /// True if the result came from the cache.
    pub reused: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    stage: String,
    fingerprint: Fingerprint,
    created: DateTime<Utc>,
    value: T,
}

/// Stage results keyed by stage name and fingerprint.
///
/// On disk the cache survives between runs; in memory it only
/// deduplicates stages within one run.
#[derive(Debug, Default)]
pub struct StageCache {
    root: Option<PathBuf>,
    memory: HashMap<String, (Fingerprint, serde_json::Value)>,
    records: Vec<StageRecord>,
}

impl StageCache {
    /// A cache persisted under `root`, created if needed.
    pub fn on_disk<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root: Some(root),
            ..Self::default()
        })
    }

    /// A cache that keeps results in memory only.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache directory, if persisted.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// File a stage result is written to, if persisted.
    pub fn artifact_path(&self, stage: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(format!("{stage}.json")))
    }

    /// Stages loaded or stored so far, in order.
    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    /// The stored result of `stage`, if its fingerprint matches.
    ///
    /// An unreadable artifact is treated as missing so the stage re-runs.
    pub fn load<T: DeserializeOwned>(&mut self, stage: &str, fingerprint: &Fingerprint) -> Result<Option<T>> {
        let value = match &self.root {
            Some(_) => self.load_from_disk(stage, fingerprint)?,
            None => self
                .memory
                .get(stage)
                .filter(|(stored, _)| stored == fingerprint)
                .map(|(_, value)| value.clone()),
        };
        let Some(value) = value else {
            return Ok(None);
        };
        let value = serde_json::from_value(value)?;
        self.records.push(StageRecord {
            stage: stage.to_string(),
            fingerprint: fingerprint.clone(),
            reused: true,
        });
        Ok(Some(value))
    }

    fn load_from_disk(&self, stage: &str, fingerprint: &Fingerprint) -> Result<Option<serde_json::Value>> {
        let Some(path) = self.artifact_path(stage) else {
            return Ok(None);
        };
        if !path.is_file() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        let envelope: Envelope<serde_json::Value> = match serde_json::from_reader(reader) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(stage, path = %path.display(), error = %e, "Ignoring unreadable stage artifact");
                return Ok(None);
            }
        };
        if &envelope.fingerprint != fingerprint {
            debug!(
                stage,
                stored = envelope.fingerprint.short(),
                wanted = fingerprint.short(),
                "Stage artifact is stale"
            );
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    /// Store a finished stage result.
    pub fn store<T: Serialize>(&mut self, stage: &str, fingerprint: &Fingerprint, value: &T) -> Result<()> {
        match self.artifact_path(stage) {
            Some(path) => {
                let envelope = Envelope {
                    stage: stage.to_string(),
                    fingerprint: fingerprint.clone(),
                    created: Utc::now(),
                    value,
                };
                write_json_atomic(&path, &envelope)?;
            }
            None => {
                self.memory
                    .insert(stage.to_string(), (fingerprint.clone(), serde_json::to_value(value)?));
            }
        }
        self.records.push(StageRecord {
            stage: stage.to_string(),
            fingerprint: fingerprint.clone(),
            reused: false,
        });
        Ok(())
    }

    /// Reuse the stored result of `stage`, or compute and store it.
    pub fn get_or_compute<T, F>(&mut self, stage: &str, fingerprint: &Fingerprint, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.load(stage, fingerprint)? {
            info!(stage, fingerprint = fingerprint.short(), "Reusing cached stage result");
            return Ok(value);
        }
        let value = compute()?;
        self.store(stage, fingerprint, &value)?;
        info!(stage, fingerprint = fingerprint.short(), "Stage complete");
        Ok(value)
    }

    /// Write a plain JSON document next to the stage artifacts.
    pub fn write_document<T: Serialize>(&self, name: &str, value: &T) -> Result<Option<PathBuf>> {
        let Some(root) = &self.root else {
            return Ok(None);
        };
        let path = root.join(name);
        write_json_atomic(&path, value)?;
        Ok(Some(path))
    }
}

/// Write JSON to a sibling temporary file, then rename it over `path`.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
