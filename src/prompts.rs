//! Prompt templates for logical-error classification.
//!
//! Rendering is pure: the same sample and taxonomy always give the same
//! prompt, so prompt hashes in traces are stable across resumed runs.

use crate::dataset::Sample;
use crate::taxonomy::Taxonomy;

// =============================================================================
// Prompt templates
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Full category table with descriptions; optional sections only when set.
    Detailed,
    /// One line per category, truncated problem and feedback.
    Compact,
}

/// A versioned classification prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    layout: Layout,
}

const COMPACT_PROBLEM_CHARS: usize = 300;
const COMPACT_FEEDBACK_CHARS: usize = 200;

impl PromptTemplate {
    pub fn render(&self, sample: &Sample, taxonomy: &Taxonomy) -> String {
        match self.layout {
            Layout::Detailed => render_detailed(sample, taxonomy),
            Layout::Compact => render_compact(sample, taxonomy),
        }
    }
}

fn render_detailed(sample: &Sample, taxonomy: &Taxonomy) -> String {
    let category_list = taxonomy
        .categories
        .iter()
        .map(|c| format!("{}. {} [{}]: {}", c.id, c.name, c.code, c.description))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "You are an expert code analyzer specializing in logical errors.\n\n\
         TASK: Classify the PRIMARY logical error in the buggy code below.\n\n\
         LOGICAL ERROR CATEGORIES:\n{category_list}\n\n\
         PROBLEM DETAILS:\n"
    );

    if let Some(problem) = sample.problem() {
        prompt.push_str(&format!("\nProblem Description:\n{problem}\n"));
    }

    prompt.push_str(&format!(
        "\nBuggy Code ({}):\n{}\n",
        sample.language,
        fenced(&sample.buggy_code, &sample.language)
    ));

    if let Some(feedback) = sample.feedback() {
        prompt.push_str(&format!("\nExecution Feedback:\n{feedback}\n"));
    }
    if let Some(hint) = sample.hint_text() {
        prompt.push_str(&format!("\nHint:\n{hint}\n"));
    }

    let instructions = taxonomy.instructions_for_models.as_deref().map(str::trim);
    prompt.push_str("\nINSTRUCTIONS:\n");
    if let Some(extra) = instructions.filter(|s| !s.is_empty()) {
        prompt.push_str(extra);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "1. Analyze the buggy code carefully\n\
         2. Identify the PRIMARY logical error\n\
         3. Classify it into ONE of the {} categories above\n\
         4. Return ONLY the category code (e.g., LOOP_COND, COND_BRANCH, etc.)\n\
         5. Do not include any explanation or additional text\n\n\
         YOUR CLASSIFICATION (code only):",
        taxonomy.categories.len()
    ));
    prompt
}

fn render_compact(sample: &Sample, taxonomy: &Taxonomy) -> String {
    let category_list = taxonomy
        .categories
        .iter()
        .map(|c| format!("{}. {} - {}", c.id, c.code, c.name))
        .collect::<Vec<_>>()
        .join("\n");
    let problem = truncate_chars(sample.problem().unwrap_or("N/A"), COMPACT_PROBLEM_CHARS);
    let feedback = truncate_chars(sample.feedback().unwrap_or("N/A"), COMPACT_FEEDBACK_CHARS);

    format!(
        "You are an expert code analyzer. Classify the PRIMARY logical error in this code.\n\n\
         Categories:\n{category_list}\n\n\
         Problem: {problem}\n\n\
         Language: {language}\n\n\
         Buggy Code:\n{code}\n\n\
         Execution Feedback: {feedback}\n\n\
         Return ONLY the category code (e.g., LOOP_COND, STMT_INTEGRITY, etc.). No explanation.",
        language = sample.language,
        code = fenced(&sample.buggy_code, &sample.language),
    )
}

/// Wrap code in a fence longer than any backtick run inside it.
fn fenced(code: &str, language: &str) -> String {
    let longest_run = code
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest_run.max(2) + 1);
    let tag = language.trim().to_lowercase();
    format!("{fence}{tag}\n{}\n{fence}", code.trim_end())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// =============================================================================
// Standard prompts
// =============================================================================

pub const DETAILED_V1: PromptTemplate = PromptTemplate {
    slug: "detailed_v1",
    layout: Layout::Detailed,
};

pub const COMPACT_V1: PromptTemplate = PromptTemplate {
    slug: "compact_v1",
    layout: Layout::Compact,
};

pub const PROMPTS: &[PromptTemplate] = &[DETAILED_V1, COMPACT_V1];
pub const DEFAULT_PROMPT: PromptTemplate = DETAILED_V1;

pub fn prompt_by_slug(slug: &str) -> Option<PromptTemplate> {
    PROMPTS.iter().find(|t| t.slug == slug).copied()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sample {
        Sample::new(
            "TEST_001",
            "Test",
            "Python",
            "def main(a):\n\tif a%2 == 0:\n\t\treturn False\n\treturn True",
        )
        .with_problem("Given an integer, return True if it is even.")
        .with_feedback("7 test cases failed.")
    }

    #[test]
    fn detailed_render_includes_every_category_and_present_sections() {
        let taxonomy = Taxonomy::default();
        let p = DEFAULT_PROMPT.render(&sample(), &taxonomy);
        for entry in &taxonomy.categories {
            assert!(p.contains(&format!("[{}]", entry.code)));
        }
        assert!(p.contains("Problem Description:\nGiven an integer"));
        assert!(p.contains("Execution Feedback:\n7 test cases failed."));
        assert!(!p.contains("Hint:"));
        assert!(p.contains("```python\ndef main(a):"));
        assert!(p.ends_with("YOUR CLASSIFICATION (code only):"));
    }

    #[test]
    fn detailed_render_omits_absent_sections() {
        let p = DEFAULT_PROMPT.render(&Sample::new("x", "D", "C", ""), &Taxonomy::default());
        assert!(!p.contains("Problem Description:"));
        assert!(!p.contains("Execution Feedback:"));
        assert!(p.contains("Buggy Code (C):"));
    }

    #[test]
    fn compact_render_truncates_long_fields() {
        let long = "x".repeat(500);
        let s = Sample::new("x", "D", "Java", "int a;")
            .with_problem(long.clone())
            .with_feedback(long);
        let p = COMPACT_V1.render(&s, &Taxonomy::default());
        assert!(p.contains(&format!("Problem: {}...", "x".repeat(300))));
        assert!(p.contains(&format!("Execution Feedback: {}...", "x".repeat(200))));
        assert!(!p.contains(&"x".repeat(301)));
        assert!(p.contains("1. LOOP_COND - "));
    }

    #[test]
    fn compact_render_marks_missing_fields() {
        let p = COMPACT_V1.render(&Sample::new("x", "D", "C", "int a;"), &Taxonomy::default());
        assert!(p.contains("Problem: N/A"));
        assert!(p.contains("Execution Feedback: N/A"));
    }

    #[test]
    fn fence_outgrows_backticks_in_code() {
        let out = fenced("let s = ```;", "Rust");
        assert!(out.starts_with("````rust\n"));
        assert!(out.ends_with("\n````"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let t = Taxonomy::default();
        assert_eq!(
            DEFAULT_PROMPT.render(&sample(), &t),
            DEFAULT_PROMPT.render(&sample(), &t)
        );
    }

    #[test]
    fn prompt_lookup() {
        assert!(prompt_by_slug("compact_v1").is_some());
        assert!(prompt_by_slug("nonexistent").is_none());
    }
}
