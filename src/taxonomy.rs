//! Logical-error taxonomy.
//!
//! Defines the seven canonical category codes, the sentinel outcomes recorded
//! when no category could be obtained, and the category table that is
//! injected into classification prompts.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// CATEGORY CODES
// =============================================================================

/// One of the seven canonical logical-error categories.
///
/// The declaration order is the canonical order: normalizers try codes in
/// this order and the first hit wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CategoryCode {
    #[serde(rename = "LOOP_COND")]
    LoopCond,
    #[serde(rename = "COND_BRANCH")]
    CondBranch,
    #[serde(rename = "STMT_INTEGRITY")]
    StmtIntegrity,
    #[serde(rename = "IO_FORMAT")]
    IoFormat,
    #[serde(rename = "VAR_INIT")]
    VarInit,
    #[serde(rename = "DATA_TYPE")]
    DataType,
    #[serde(rename = "COMPUTATION")]
    Computation,
}

impl CategoryCode {
    /// All codes in canonical order.
    pub const ALL: [CategoryCode; 7] = [
        CategoryCode::LoopCond,
        CategoryCode::CondBranch,
        CategoryCode::StmtIntegrity,
        CategoryCode::IoFormat,
        CategoryCode::VarInit,
        CategoryCode::DataType,
        CategoryCode::Computation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryCode::LoopCond => "LOOP_COND",
            CategoryCode::CondBranch => "COND_BRANCH",
            CategoryCode::StmtIntegrity => "STMT_INTEGRITY",
            CategoryCode::IoFormat => "IO_FORMAT",
            CategoryCode::VarInit => "VAR_INIT",
            CategoryCode::DataType => "DATA_TYPE",
            CategoryCode::Computation => "COMPUTATION",
        }
    }
}

impl fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category code: {0}")]
pub struct UnknownCode(pub String);

impl FromStr for CategoryCode {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        CategoryCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == upper)
            .ok_or_else(|| UnknownCode(s.to_string()))
    }
}

// =============================================================================
// SENTINELS
// =============================================================================

/// Non-canonical outcome recorded when a classification could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// The response contained no recognizable category code.
    ParseError,
    /// HTTP 429 persisted through every retry.
    RateLimited,
    /// The backend was still cold-starting after the loading retry.
    ModelLoading,
    /// The requested model id is not served for this account.
    ModelNotAvailable,
    /// Provider-reported quota exhaustion.
    QuotaExceeded,
    /// Any other failure (network, unexpected status, malformed payload).
    Error,
}

impl Sentinel {
    pub const ALL: [Sentinel; 6] = [
        Sentinel::ParseError,
        Sentinel::RateLimited,
        Sentinel::ModelLoading,
        Sentinel::ModelNotAvailable,
        Sentinel::QuotaExceeded,
        Sentinel::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentinel::ParseError => "PARSE_ERROR",
            Sentinel::RateLimited => "RATE_LIMITED",
            Sentinel::ModelLoading => "MODEL_LOADING",
            Sentinel::ModelNotAvailable => "MODEL_NOT_AVAILABLE",
            Sentinel::QuotaExceeded => "QUOTA_EXCEEDED",
            Sentinel::Error => "ERROR",
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Result of one provider call for one sample, stored as a bare string.
///
/// `Other` keeps strings that are neither a canonical code nor a known
/// sentinel (older result files recorded things like `ERROR_503`). It always
/// counts as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Outcome {
    Category(CategoryCode),
    Sentinel(Sentinel),
    Other(String),
}

impl Outcome {
    /// The canonical category, if this outcome is one.
    pub fn category(&self) -> Option<CategoryCode> {
        match self {
            Outcome::Category(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_category(&self) -> bool {
        matches!(self, Outcome::Category(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Outcome::Category(code) => code.as_str(),
            Outcome::Sentinel(sentinel) => sentinel.as_str(),
            Outcome::Other(raw) => raw,
        }
    }
}

impl From<CategoryCode> for Outcome {
    fn from(code: CategoryCode) -> Self {
        Outcome::Category(code)
    }
}

impl From<Sentinel> for Outcome {
    fn from(sentinel: Sentinel) -> Self {
        Outcome::Sentinel(sentinel)
    }
}

impl From<String> for Outcome {
    fn from(raw: String) -> Self {
        if let Ok(code) = raw.parse::<CategoryCode>() {
            return Outcome::Category(code);
        }
        let trimmed = raw.trim();
        match Sentinel::ALL.iter().find(|s| s.as_str() == trimmed) {
            Some(sentinel) => Outcome::Sentinel(*sentinel),
            None => Outcome::Other(raw),
        }
    }
}

impl From<&str> for Outcome {
    fn from(raw: &str) -> Self {
        Outcome::from(raw.to_string())
    }
}

impl From<Outcome> for String {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Other(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TAXONOMY TABLE
// =============================================================================

/// One row of the category table shown to models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub id: u32,
    pub code: CategoryCode,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Ordered category table, injected into prompts at render time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taxonomy {
    #[serde(default = "default_version")]
    pub taxonomy_version: String,
    #[serde(default)]
    pub paper_reference: Option<String>,
    pub categories: Vec<TaxonomyEntry>,
    #[serde(default)]
    pub instructions_for_models: Option<String>,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum TaxonomyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse taxonomy: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid taxonomy: {0}")]
    Invalid(String),
}

impl Taxonomy {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TaxonomyError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, TaxonomyError> {
        let taxonomy: Taxonomy = serde_json::from_str(raw)?;
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    fn validate(&self) -> Result<(), TaxonomyError> {
        if self.categories.is_empty() {
            return Err(TaxonomyError::Invalid("no categories".to_string()));
        }
        let mut seen = HashSet::new();
        for entry in &self.categories {
            if !seen.insert(entry.code) {
                return Err(TaxonomyError::Invalid(format!(
                    "duplicate category code {}",
                    entry.code
                )));
            }
        }
        Ok(())
    }

    pub fn entry(&self, code: CategoryCode) -> Option<&TaxonomyEntry> {
        self.categories.iter().find(|e| e.code == code)
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        let rows: [(CategoryCode, &str, &str); 7] = [
            (
                CategoryCode::LoopCond,
                "Loop Condition Error",
                "Incorrect loop bounds, termination test or iteration count (off-by-one, wrong comparison in a for/while header).",
            ),
            (
                CategoryCode::CondBranch,
                "Conditional Branch Error",
                "Wrong condition in an if/else or switch: inverted, incomplete or misplaced branch logic.",
            ),
            (
                CategoryCode::StmtIntegrity,
                "Statement Integrity Error",
                "A statement is missing, extra, misplaced or incorrect (e.g. a forgotten update or return).",
            ),
            (
                CategoryCode::IoFormat,
                "Input/Output Format Error",
                "Input is read or output is printed in the wrong format, order or separator.",
            ),
            (
                CategoryCode::VarInit,
                "Variable Initialization Error",
                "A variable starts with the wrong value, is never initialized or is reset in the wrong place.",
            ),
            (
                CategoryCode::DataType,
                "Data Type Error",
                "Wrong data type: overflow, integer vs floating-point division, precision loss or bad casts.",
            ),
            (
                CategoryCode::Computation,
                "Computation Error",
                "Wrong arithmetic or logical computation: incorrect formula, operator or operand.",
            ),
        ];

        let categories = rows
            .iter()
            .enumerate()
            .map(|(idx, (code, name, description))| TaxonomyEntry {
                id: idx as u32 + 1,
                code: *code,
                name: (*name).to_string(),
                description: (*description).to_string(),
                examples: Vec::new(),
            })
            .collect();

        Self {
            taxonomy_version: default_version(),
            paper_reference: None,
            categories,
            instructions_for_models: None,
        }
    }
}
