//! Input samples and the loader that reads them.
//!
//! The sample file is a JSON array. Its order defines resume offsets, so the
//! loader never reorders or filters.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One buggy program to classify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub unified_id: String,
    pub source_dataset: String,
    pub language: String,
    #[serde(default)]
    pub problem_description: Option<String>,
    #[serde(default)]
    pub buggy_code: String,
    #[serde(default)]
    pub execution_feedback: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl Sample {
    pub fn new(
        unified_id: impl Into<String>,
        source_dataset: impl Into<String>,
        language: impl Into<String>,
        buggy_code: impl Into<String>,
    ) -> Self {
        Self {
            unified_id: unified_id.into(),
            source_dataset: source_dataset.into(),
            language: language.into(),
            problem_description: None,
            buggy_code: buggy_code.into(),
            execution_feedback: None,
            hint: None,
        }
    }

    pub fn with_problem(mut self, text: impl Into<String>) -> Self {
        self.problem_description = Some(text.into());
        self
    }

    pub fn with_feedback(mut self, text: impl Into<String>) -> Self {
        self.execution_feedback = Some(text.into());
        self
    }

    pub fn with_hint(mut self, text: impl Into<String>) -> Self {
        self.hint = Some(text.into());
        self
    }

    /// Optional text fields count as absent when blank.
    pub fn problem(&self) -> Option<&str> {
        non_blank(self.problem_description.as_deref())
    }

    pub fn feedback(&self) -> Option<&str> {
        non_blank(self.execution_feedback.as_deref())
    }

    pub fn hint_text(&self) -> Option<&str> {
        non_blank(self.hint.as_deref())
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate unified_id {0}")]
    DuplicateId(String),
}

/// Source of samples, in a stable order.
pub trait SampleLoader {
    /// Load at most `limit` samples (all when `None`), preserving order.
    fn load_samples(&self, limit: Option<usize>) -> Result<Vec<Sample>, DatasetError>;
}

/// Reads a JSON array of samples from disk.
#[derive(Debug, Clone)]
pub struct JsonSampleLoader {
    path: PathBuf,
}

impl JsonSampleLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleLoader for JsonSampleLoader {
    fn load_samples(&self, limit: Option<usize>) -> Result<Vec<Sample>, DatasetError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| DatasetError::Io {
            path: self.path.clone(),
            source,
        })?;
        let mut samples: Vec<Sample> =
            serde_json::from_str(&raw).map_err(|source| DatasetError::Parse {
                path: self.path.clone(),
                source,
            })?;
        if let Some(limit) = limit {
            samples.truncate(limit);
        }

        let mut seen = std::collections::HashSet::with_capacity(samples.len());
        for sample in &samples {
            if !seen.insert(sample.unified_id.as_str()) {
                return Err(DatasetError::DuplicateId(sample.unified_id.clone()));
            }
        }

        tracing::info!(
            path = %self.path.display(),
            count = samples.len(),
            "loaded samples"
        );
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("samples.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_in_file_order_and_applies_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"[
                {"unified_id": "b", "source_dataset": "D1", "language": "Python", "buggy_code": "x"},
                {"unified_id": "a", "source_dataset": "D2", "language": "C", "buggy_code": "y",
                 "problem_description": "p", "extra_field": 3},
                {"unified_id": "c", "source_dataset": "D1", "language": "Java"}
            ]"#,
        );

        let loader = JsonSampleLoader::new(&path);
        let all = loader.load_samples(None).unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.unified_id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
        assert_eq!(all[2].buggy_code, "");
        assert_eq!(all[1].problem(), Some("p"));

        let two = loader.load_samples(Some(2)).unwrap();
        assert_eq!(two.len(), 2);
        assert_eq!(two[1].unified_id, "a");
    }

    #[test]
    fn blank_optional_fields_count_as_absent() {
        let sample = Sample::new("id", "D", "Python", "code")
            .with_problem("   ")
            .with_feedback("3 tests failed");
        assert_eq!(sample.problem(), None);
        assert_eq!(sample.feedback(), Some("3 tests failed"));
        assert_eq!(sample.hint_text(), None);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"[{"unified_id": "a", "source_dataset": "D", "language": "C"},
                {"unified_id": "a", "source_dataset": "D", "language": "C"}]"#,
        );
        let err = JsonSampleLoader::new(&path).load_samples(None).unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = JsonSampleLoader::new("/definitely/not/here.json")
            .load_samples(None)
            .unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }
}
