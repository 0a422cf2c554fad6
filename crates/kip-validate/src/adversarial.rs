//! Adversarial review
//!
//! The final red-team pass over a run's full fact/finding set. It does not
//! re-check rules the earlier layers own; it hunts for what they cannot see:
//! thin evidence, suspiciously round numbers, and domains that produced far
//! fewer facts than their source volume suggests they should.

use kip_core::{EntityRef, Fact, Flag, FlagSeverity, RunId};
use std::collections::HashMap;

/// Thresholds for the adversarial heuristics.
#[derive(Debug, Clone)]
pub struct AdversarialConfig {
    /// Quotes shorter than this many characters count as thin evidence
    pub min_quote_chars: usize,
    /// Flag a domain when more than this fraction of its facts have thin evidence
    pub max_thin_evidence_ratio: f64,
    /// Flag when more than this fraction of numeric details are round multiples
    pub max_round_number_ratio: f64,
    /// Flag a domain producing fewer than this many facts per source document
    pub min_facts_per_document: f64,
}

impl Default for AdversarialConfig {
    fn default() -> Self {
        Self {
            min_quote_chars: 20,
            max_thin_evidence_ratio: 0.5,
            max_round_number_ratio: 0.8,
            min_facts_per_document: 1.0,
        }
    }
}

/// Red-team reviewer over a run's complete output.
#[derive(Debug, Clone, Default)]
pub struct AdversarialReviewer {
    config: AdversarialConfig,
}

impl AdversarialReviewer {
    /// Build a reviewer with explicit thresholds.
    #[must_use]
    pub fn new(config: AdversarialConfig) -> Self {
        Self { config }
    }

    /// Review a run. `source_volume` maps each domain to the number of
    /// source documents it was extracted from.
    #[must_use]
    pub fn review(
        &self,
        run: RunId,
        facts: &[Fact],
        source_volume: &HashMap<String, usize>,
    ) -> Vec<Flag> {
        let mut flags = Vec::new();
        flags.extend(self.check_evidence_density(run, facts));
        flags.extend(self.check_round_numbers(run, facts));
        flags.extend(self.check_sparse_domains(run, facts, source_volume));
        tracing::info!(flag_count = flags.len(), "adversarial review complete");
        flags
    }

    fn check_evidence_density(&self, run: RunId, facts: &[Fact]) -> Vec<Flag> {
        let mut by_domain: HashMap<&str, (usize, usize)> = HashMap::new();
        for fact in facts {
            let entry = by_domain.entry(fact.domain.as_str()).or_default();
            entry.0 += 1;
            if fact.evidence.quote.chars().count() < self.config.min_quote_chars {
                entry.1 += 1;
            }
        }
        by_domain
            .into_iter()
            .filter(|(_, (total, thin))| {
                *total > 0 && *thin as f64 / *total as f64 > self.config.max_thin_evidence_ratio
            })
            .map(|(domain, (total, thin))| {
                Flag::new(
                    "low_evidence_density",
                    FlagSeverity::Warning,
                    format!("domain `{domain}`: {thin} of {total} facts quote fewer than {} chars",
                        self.config.min_quote_chars),
                    EntityRef::Run(run),
                )
            })
            .collect()
    }

    fn check_round_numbers(&self, run: RunId, facts: &[Fact]) -> Vec<Flag> {
        let mut total = 0usize;
        let mut round = 0usize;
        for fact in facts {
            for value in fact.details.values() {
                let n = match value {
                    serde_json::Value::Number(n) => n.as_f64(),
                    _ => None,
                };
                if let Some(n) = n {
                    if n >= 100.0 {
                        total += 1;
                        if n % 100.0 == 0.0 {
                            round += 1;
                        }
                    }
                }
            }
        }
        if total >= 3 && round as f64 / total as f64 > self.config.max_round_number_ratio {
            vec![Flag::new(
                "suspiciously_round_numbers",
                FlagSeverity::Warning,
                format!("{round} of {total} large numeric details are round multiples of 100"),
                EntityRef::Run(run),
            )]
        } else {
            Vec::new()
        }
    }

    fn check_sparse_domains(
        &self,
        run: RunId,
        facts: &[Fact],
        source_volume: &HashMap<String, usize>,
    ) -> Vec<Flag> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for fact in facts {
            *counts.entry(fact.domain.as_str()).or_default() += 1;
        }
        source_volume
            .iter()
            .filter(|(_, docs)| **docs > 0)
            .filter_map(|(domain, docs)| {
                let produced = counts.get(domain.as_str()).copied().unwrap_or(0);
                let per_doc = produced as f64 / *docs as f64;
                (per_doc < self.config.min_facts_per_document).then(|| {
                    Flag::new(
                        "sparse_domain",
                        FlagSeverity::Warning,
                        format!(
                            "domain `{domain}` produced {produced} facts from {docs} source documents"
                        ),
                        EntityRef::Run(run),
                    )
                })
            })
            .collect()
    }
}
