//! Result records and the checkpoint store.
//!
//! The checkpoint is the full result sequence as a pretty JSON array, the same
//! shape as the final results file. Writes go to a temp file that is renamed
//! over the target, so a crash leaves either the old or the new checkpoint.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dataset::Sample;
use crate::taxonomy::Outcome;

// =============================================================================
// RESULT RECORD
// =============================================================================

/// Provider name → outcome, kept in insertion (call) order so result files
/// list providers the way they were configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderOutcomes(Vec<(String, Outcome)>);

impl ProviderOutcomes {
    pub fn get(&self, provider: &str) -> Option<&Outcome> {
        self.0.iter().find(|(p, _)| p == provider).map(|(_, o)| o)
    }

    pub fn contains_key(&self, provider: &str) -> bool {
        self.get(provider).is_some()
    }

    /// Replace in place when present, otherwise append.
    pub fn insert(&mut self, provider: String, outcome: Outcome) {
        match self.0.iter_mut().find(|(p, _)| *p == provider) {
            Some(slot) => slot.1 = outcome,
            None => self.0.push((provider, outcome)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.iter().map(|(p, _)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Outcome)> {
        self.0.iter().map(|(p, o)| (p.as_str(), o))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ProviderOutcomes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (provider, outcome) in &self.0 {
            map.serialize_entry(provider, outcome)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProviderOutcomes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OutcomesVisitor;

        impl<'de> Visitor<'de> for OutcomesVisitor {
            type Value = ProviderOutcomes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of provider name to outcome")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut outcomes = ProviderOutcomes::default();
                while let Some((provider, outcome)) = access.next_entry::<String, Outcome>()? {
                    outcomes.insert(provider, outcome);
                }
                Ok(outcomes)
            }
        }

        deserializer.deserialize_map(OutcomesVisitor)
    }
}

/// Per-sample classification record: sample metadata plus one outcome per
/// provider, keyed by provider name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub unified_id: String,
    pub source_dataset: String,
    pub language: String,
    /// RFC 3339, set when the record is first created.
    pub timestamp: String,
    #[serde(flatten)]
    pub outcomes: ProviderOutcomes,
}

impl ClassificationResult {
    pub fn for_sample(sample: &Sample) -> Self {
        Self {
            unified_id: sample.unified_id.clone(),
            source_dataset: sample.source_dataset.clone(),
            language: sample.language.clone(),
            timestamp: Utc::now().to_rfc3339(),
            outcomes: ProviderOutcomes::default(),
        }
    }

    pub fn outcome(&self, provider: &str) -> Option<&Outcome> {
        self.outcomes.get(provider)
    }

    pub fn set_outcome(&mut self, provider: impl Into<String>, outcome: Outcome) {
        self.outcomes.insert(provider.into(), outcome);
    }

    /// Providers from `providers` with no stored outcome, in the given order.
    pub fn missing_providers<'a>(&self, providers: &'a [String]) -> Vec<&'a str> {
        providers
            .iter()
            .filter(|p| !self.outcomes.contains_key(p.as_str()))
            .map(String::as_str)
            .collect()
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt checkpoint {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("checkpoint {0} is locked by another run")]
    Locked(PathBuf),
}

/// Durable result sequence. Saves overwrite the whole sequence.
pub trait CheckpointStore: Send + Sync {
    /// Stored sequence; empty when nothing was saved yet.
    fn load(&self) -> Result<Vec<ClassificationResult>, CheckpointError>;

    fn save(&self, results: &[ClassificationResult]) -> Result<(), CheckpointError>;
}

#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    path: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the advisory lock on `<checkpoint>.lock`; held until the guard
    /// drops. Fails fast when another run holds it.
    pub fn lock_exclusive(&self) -> Result<CheckpointLock, CheckpointError> {
        CheckpointLock::acquire(&self.path)
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn load(&self) -> Result<Vec<ClassificationResult>, CheckpointError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        load_results(&self.path)
    }

    fn save(&self, results: &[ClassificationResult]) -> Result<(), CheckpointError> {
        write_results(&self.path, results)?;
        tracing::debug!(path = %self.path.display(), count = results.len(), "checkpoint saved");
        Ok(())
    }
}

#[derive(Debug)]
pub struct CheckpointLock {
    _file: fs::File,
}

impl CheckpointLock {
    fn acquire(checkpoint: &Path) -> Result<Self, CheckpointError> {
        let lock_path = lock_path_for(checkpoint);
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|source| CheckpointError::Io {
                path: lock_path.clone(),
                source,
            })?;
        file.try_lock_exclusive()
            .map_err(|_| CheckpointError::Locked(checkpoint.to_path_buf()))?;
        Ok(Self { _file: file })
    }
}

fn lock_path_for(checkpoint: &Path) -> PathBuf {
    let mut name = checkpoint
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "checkpoint".into());
    name.push(".lock");
    checkpoint.with_file_name(name)
}

// =============================================================================
// FILE HELPERS
// =============================================================================

/// Read a results/checkpoint file.
pub fn load_results(path: &Path) -> Result<Vec<ClassificationResult>, CheckpointError> {
    let raw = fs::read_to_string(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CheckpointError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a results/checkpoint file atomically.
pub fn write_results(path: &Path, results: &[ClassificationResult]) -> Result<(), CheckpointError> {
    let bytes = serde_json::to_vec_pretty(results).map_err(|source| CheckpointError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, &bytes).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = parent {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
