//! Response-to-category normalization.
//!
//! Providers answer in free text. A [`Normalizer`] cleans the text and runs an
//! ordered list of [`MatchRule`]s; the first rule that finds a code wins and
//! anything unmatched becomes [`Sentinel::ParseError`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::taxonomy::{CategoryCode, Outcome, Sentinel};

static THINK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?think>").expect("Invalid think tag regex"));

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("Invalid think block regex"));

// An opening tag with no close: the response was cut off mid-deliberation.
static THINK_UNCLOSED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*$").expect("Invalid unclosed think regex"));

/// `\bCODE\b` per canonical code, in canonical order.
static WHOLE_TOKEN: Lazy<Vec<(CategoryCode, Regex)>> = Lazy::new(|| {
    CategoryCode::ALL
        .iter()
        .map(|code| {
            let pattern = format!(r"\b{}\b", regex::escape(code.as_str()));
            (*code, Regex::new(&pattern).expect("Invalid category regex"))
        })
        .collect()
});

/// Same as [`WHOLE_TOKEN`] but the words of a code may be separated by any run
/// of spaces, hyphens or underscores (`LOOP COND`, `loop-cond`).
static LOOSE_TOKEN: Lazy<Vec<(CategoryCode, Regex)>> = Lazy::new(|| {
    CategoryCode::ALL
        .iter()
        .map(|code| {
            let words: Vec<String> = code.as_str().split('_').map(regex::escape).collect();
            let pattern = format!(r"\b{}\b", words.join(r"[ \t\-_]+"));
            (*code, Regex::new(&pattern).expect("Invalid loose category regex"))
        })
        .collect()
});

// =============================================================================
// RULES
// =============================================================================

/// A single matching strategy. Receives upper-cased, think-cleaned text.
pub trait MatchRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn find(&self, text: &str) -> Option<CategoryCode>;
}

/// Scans the whole text for a standalone code, trying codes in canonical
/// order. Position in the text does not matter.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeTokenRule;

impl MatchRule for WholeTokenRule {
    fn name(&self) -> &'static str {
        "whole_token"
    }

    fn find(&self, text: &str) -> Option<CategoryCode> {
        WHOLE_TOKEN
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(code, _)| *code)
    }
}

/// Looks only at the last few short, non-empty lines, newest first.
///
/// Models that write a long rationale usually restate the answer on a final
/// line; the words of the code may be spaced or hyphenated there.
#[derive(Debug, Clone, Copy)]
pub struct TrailingLinesRule {
    pub max_lines: usize,
    pub max_line_len: usize,
}

impl Default for TrailingLinesRule {
    fn default() -> Self {
        Self {
            max_lines: 5,
            max_line_len: 50,
        }
    }
}

impl MatchRule for TrailingLinesRule {
    fn name(&self) -> &'static str {
        "trailing_lines"
    }

    fn find(&self, text: &str) -> Option<CategoryCode> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let start = lines.len().saturating_sub(self.max_lines);

        lines[start..]
            .iter()
            .rev()
            .filter(|line| line.chars().count() < self.max_line_len)
            .find_map(|line| {
                LOOSE_TOKEN
                    .iter()
                    .find(|(_, re)| re.is_match(line))
                    .map(|(code, _)| *code)
            })
    }
}

// =============================================================================
// NORMALIZER
// =============================================================================

/// What to do with `<think>` markup before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkHandling {
    /// Remove the tags, keep the text between them.
    StripTags,
    /// Remove whole `<think>…</think>` blocks (and an unclosed trailing one).
    DropBlocks,
}

/// Named normalizer presets, selectable per provider in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizerKind {
    #[default]
    Standard,
    Reasoning,
}

impl NormalizerKind {
    pub fn build(self) -> Normalizer {
        match self {
            NormalizerKind::Standard => Normalizer::standard(),
            NormalizerKind::Reasoning => Normalizer::reasoning(),
        }
    }
}

pub struct Normalizer {
    think: ThinkHandling,
    rules: Vec<Box<dyn MatchRule>>,
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("Normalizer")
            .field("think", &self.think)
            .field("rules", &names)
            .finish()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::standard()
    }
}

impl Normalizer {
    /// Empty normalizer; add rules with [`Normalizer::with_rule`].
    pub fn new(think: ThinkHandling) -> Self {
        Self {
            think,
            rules: Vec::new(),
        }
    }

    /// Whole-text scan, then trailing-lines fallback. Think tags are stripped.
    pub fn standard() -> Self {
        Self::new(ThinkHandling::StripTags)
            .with_rule(WholeTokenRule)
            .with_rule(TrailingLinesRule::default())
    }

    /// Like [`Normalizer::standard`] but deliberation blocks are discarded.
    pub fn reasoning() -> Self {
        Self::new(ThinkHandling::DropBlocks)
            .with_rule(WholeTokenRule)
            .with_rule(TrailingLinesRule::default())
    }

    pub fn with_rule(mut self, rule: impl MatchRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn normalize(&self, raw: &str) -> Outcome {
        match self.classify(raw) {
            Some((code, _)) => Outcome::Category(code),
            None => Outcome::Sentinel(Sentinel::ParseError),
        }
    }

    /// Matched code and the name of the rule that produced it.
    pub fn classify(&self, raw: &str) -> Option<(CategoryCode, &'static str)> {
        let text = self.clean(raw);
        self.rules
            .iter()
            .find_map(|rule| rule.find(&text).map(|code| (code, rule.name())))
    }

    fn clean(&self, raw: &str) -> String {
        let text = match self.think {
            ThinkHandling::StripTags => THINK_TAG.replace_all(raw, "").into_owned(),
            ThinkHandling::DropBlocks => {
                let closed = THINK_BLOCK.replace_all(raw, "");
                let unclosed = THINK_UNCLOSED.replace_all(&closed, "");
                THINK_TAG.replace_all(&unclosed, "").into_owned()
            }
        };
        text.trim().to_uppercase()
    }
}

static DEFAULT_NORMALIZER: Lazy<Normalizer> = Lazy::new(Normalizer::standard);

/// Normalize with the standard rule set.
pub fn normalize(raw: &str) -> Outcome {
    DEFAULT_NORMALIZER.normalize(raw)
}
