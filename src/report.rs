//! Markdown reports for runs and conflict analyses.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::checkpoint::ClassificationResult;
use crate::conflict::ConflictReport;
use crate::orchestrator::RunSummary;

/// Outcome mix of one provider across a stored result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCoverage {
    pub provider: String,
    pub valid: usize,
    /// Results with no outcome at all for this provider.
    pub missing: usize,
    /// Failure string → count (sentinels and unrecognized strings).
    pub failures: BTreeMap<String, usize>,
}

impl ProviderCoverage {
    pub fn failed(&self) -> usize {
        self.failures.values().sum()
    }
}

pub fn provider_coverage(
    results: &[ClassificationResult],
    providers: &[String],
) -> Vec<ProviderCoverage> {
    providers
        .iter()
        .map(|provider| {
            let mut row = ProviderCoverage {
                provider: provider.clone(),
                valid: 0,
                missing: 0,
                failures: BTreeMap::new(),
            };
            for result in results {
                match result.outcome(provider) {
                    None => row.missing += 1,
                    Some(o) if o.is_category() => row.valid += 1,
                    Some(o) => *row.failures.entry(o.as_str().to_string()).or_insert(0) += 1,
                }
            }
            row
        })
        .collect()
}

/// Provider names found in a result set, in first-seen order. Within one
/// record, keys keep the order the providers were called in.
pub fn providers_in(results: &[ClassificationResult]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for result in results {
        for key in result.outcomes.keys() {
            if !seen.contains(key) {
                seen.push(key.clone());
            }
        }
    }
    seen
}

pub fn hash_results(results: &[ClassificationResult]) -> String {
    let bytes = serde_json::to_vec(results).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

pub fn render_run_markdown(summary: &RunSummary, coverage: &[ProviderCoverage]) -> String {
    let mut out = String::new();
    out.push_str("# Classification Run\n\n");
    out.push_str(&format!("- Run id: `{}`\n", summary.run_id));
    out.push_str(&format!("- Phase: {}\n", summary.phase.as_str()));
    out.push_str(&format!(
        "- Completed: {}/{} (resumed from {}, {} new)\n",
        summary.completed, summary.total_samples, summary.resumed_from, summary.processed
    ));
    if summary.backfilled > 0 {
        out.push_str(&format!("- Backfilled: {}\n", summary.backfilled));
    }
    out.push_str(&format!("- Elapsed: {} ms\n", summary.elapsed_ms));

    out.push_str("\n## This Run\n\n");
    out.push_str("| provider | valid | errors | retries | valid rate |\n");
    out.push_str("|---|---:|---:|---:|---:|\n");
    for stats in &summary.providers {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {:.1}% |\n",
            stats.provider,
            stats.valid,
            stats.errors,
            stats.retries,
            stats.valid_rate() * 100.0
        ));
    }

    if !coverage.is_empty() {
        out.push_str("\n## All Stored Results\n\n");
        out.push_str(&render_coverage(coverage));
    }
    out
}

fn render_coverage(coverage: &[ProviderCoverage]) -> String {
    let mut out = String::new();
    for row in coverage {
        let failures = row
            .failures
            .iter()
            .map(|(k, v)| format!("{k} {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "- {}: {} valid, {} failed, {} missing{}\n",
            row.provider,
            row.valid,
            row.failed(),
            row.missing,
            if failures.is_empty() {
                String::new()
            } else {
                format!(" ({failures})")
            }
        ));
    }
    out
}

pub fn render_conflict_markdown(
    report: &ConflictReport,
    coverage: &[ProviderCoverage],
    max_entries: usize,
) -> String {
    let mut out = String::new();
    out.push_str("# Conflict Analysis\n\n");
    out.push_str(&format!("- Providers: {}\n", report.providers.join(", ")));
    out.push_str(&format!("- Total results: {}\n", report.total_results));
    out.push_str(&format!(
        "- Analyzed (all providers valid): {} ({:.1}%)\n",
        report.analyzed,
        pct(report.analyzed, report.total_results)
    ));
    out.push_str(&format!(
        "- Conflicts: {} ({:.1}%)\n",
        report.conflicts,
        report.conflict_rate * 100.0
    ));

    if !coverage.is_empty() {
        out.push_str("\n## Provider Coverage\n\n");
        out.push_str(&render_coverage(coverage));
    }

    if !report.pair_breakdown.is_empty() {
        out.push_str("\n## Conflict Breakdown\n\n");
        for row in &report.pair_breakdown {
            out.push_str(&format!("- {:<40} {:>4}\n", row.label, row.count));
        }
    }

    if !report.by_dataset.is_empty() {
        out.push_str("\n## Dataset Distribution\n\n");
        for row in &report.by_dataset {
            out.push_str(&format!("- {:<20} {:>4}\n", row.label, row.count));
        }
    }

    if !report.by_distinct_codes.is_empty() {
        out.push_str("\n## Distinct Codes per Conflict\n\n");
        for (distinct, count) in &report.by_distinct_codes {
            out.push_str(&format!("- {distinct} codes: {count}\n"));
        }
    }

    if !report.pairwise_agreement.is_empty() {
        out.push_str("\n## Pairwise Agreement\n\n");
        for pair in &report.pairwise_agreement {
            out.push_str(&format!(
                "- {} / {}: {}/{} agree ({:.1}%)\n",
                pair.first,
                pair.second,
                pair.agree,
                pair.both_valid,
                pair.agreement_rate * 100.0
            ));
        }
    }

    if !report.entries.is_empty() && max_entries > 0 {
        out.push_str("\n## Conflicts\n\n");
        for entry in report.entries.iter().take(max_entries) {
            let codes = entry
                .predictions
                .iter()
                .map(|p| format!("{}={}", p.provider, p.code))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "- `{}` ({}, {}): {}\n",
                entry.unified_id, entry.source_dataset, entry.language, codes
            ));
        }
        if report.entries.len() > max_entries {
            out.push_str(&format!(
                "- ... {} more\n",
                report.entries.len() - max_entries
            ));
        }
    }
    out
}

fn pct(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 * 100.0 / den as f64
    }
}
