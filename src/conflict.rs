//! Post-hoc agreement analysis over a (possibly partial) result set.
//!
//! Only canonical categories take part: a result with a sentinel for any
//! compared provider is left out of the analyzed set entirely.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::checkpoint::ClassificationResult;
use crate::taxonomy::CategoryCode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCode {
    pub provider: String,
    pub code: CategoryCode,
}

/// One sample on which the compared providers disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub unified_id: String,
    pub source_dataset: String,
    pub language: String,
    /// Number of distinct codes among the compared providers.
    pub distinct: usize,
    /// One code per compared provider, in provider order.
    pub predictions: Vec<ProviderCode>,
}

impl ConflictEntry {
    pub fn code_for(&self, provider: &str) -> Option<CategoryCode> {
        self.predictions
            .iter()
            .find(|p| p.provider == provider)
            .map(|p| p.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

/// Agreement between two providers over results where both produced a
/// category, whatever the other providers returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairAgreement {
    pub first: String,
    pub second: String,
    pub both_valid: usize,
    pub agree: usize,
    pub agreement_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub providers: Vec<String>,
    pub total_results: usize,
    /// Results where every compared provider produced a category.
    pub analyzed: usize,
    pub conflicts: usize,
    /// `conflicts / analyzed`, 0 when nothing was analyzed.
    pub conflict_rate: f64,
    /// `"{codeA} vs {codeB}"` counts; only filled for exactly two providers.
    pub pair_breakdown: Vec<LabelCount>,
    pub by_dataset: Vec<LabelCount>,
    /// Distinct-set size → number of conflicts with that size.
    pub by_distinct_codes: BTreeMap<usize, usize>,
    pub entries: Vec<ConflictEntry>,
    pub pairwise_agreement: Vec<PairAgreement>,
}

/// Analyze `results` across `providers` (order matters for pair labels and
/// entry layout). Pure.
pub fn analyze(results: &[ClassificationResult], providers: &[String]) -> ConflictReport {
    let mut analyzed = 0usize;
    let mut entries = Vec::new();

    if !providers.is_empty() {
        for result in results {
            let Some(codes) = categories_for(result, providers) else {
                continue;
            };
            analyzed += 1;
            let distinct: BTreeSet<CategoryCode> = codes.iter().copied().collect();
            if distinct.len() > 1 {
                entries.push(ConflictEntry {
                    unified_id: result.unified_id.clone(),
                    source_dataset: result.source_dataset.clone(),
                    language: result.language.clone(),
                    distinct: distinct.len(),
                    predictions: providers
                        .iter()
                        .zip(codes)
                        .map(|(provider, code)| ProviderCode {
                            provider: provider.clone(),
                            code,
                        })
                        .collect(),
                });
            }
        }
    }

    let pair_breakdown = if providers.len() == 2 {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &entries {
            let label = format!(
                "{} vs {}",
                entry.predictions[0].code, entry.predictions[1].code
            );
            *counts.entry(label).or_insert(0) += 1;
        }
        sorted_by_count(counts)
    } else {
        Vec::new()
    };

    let mut datasets: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_distinct_codes: BTreeMap<usize, usize> = BTreeMap::new();
    for entry in &entries {
        *datasets.entry(entry.source_dataset.clone()).or_insert(0) += 1;
        *by_distinct_codes.entry(entry.distinct).or_insert(0) += 1;
    }
    let by_dataset = datasets
        .into_iter()
        .map(|(label, count)| LabelCount { label, count })
        .collect();

    ConflictReport {
        providers: providers.to_vec(),
        total_results: results.len(),
        analyzed,
        conflicts: entries.len(),
        conflict_rate: ratio(entries.len(), analyzed),
        pair_breakdown,
        by_dataset,
        by_distinct_codes,
        entries,
        pairwise_agreement: pairwise_agreement(results, providers),
    }
}

/// Every provider's category, in provider order; `None` if any is missing or
/// a sentinel.
fn categories_for(result: &ClassificationResult, providers: &[String]) -> Option<Vec<CategoryCode>> {
    providers
        .iter()
        .map(|p| result.outcome(p).and_then(|o| o.category()))
        .collect()
}

fn pairwise_agreement(results: &[ClassificationResult], providers: &[String]) -> Vec<PairAgreement> {
    let mut out = Vec::new();
    for (i, first) in providers.iter().enumerate() {
        for second in &providers[i + 1..] {
            let mut both_valid = 0usize;
            let mut agree = 0usize;
            for result in results {
                let a = result.outcome(first).and_then(|o| o.category());
                let b = result.outcome(second).and_then(|o| o.category());
                if let (Some(a), Some(b)) = (a, b) {
                    both_valid += 1;
                    if a == b {
                        agree += 1;
                    }
                }
            }
            out.push(PairAgreement {
                first: first.clone(),
                second: second.clone(),
                both_valid,
                agree,
                agreement_rate: ratio(agree, both_valid),
            });
        }
    }
    out
}

/// Count descending, then label ascending.
fn sorted_by_count(counts: BTreeMap<String, usize>) -> Vec<LabelCount> {
    let mut rows: Vec<LabelCount> = counts
        .into_iter()
        .map(|(label, count)| LabelCount { label, count })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    rows
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
