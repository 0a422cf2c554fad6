//! Cross-domain sanity ratios
//!
//! Runs once all domains for a run are persisted. Ratios like
//! endpoints-per-staff or cost-per-head outside their configured bounds are
//! heuristics: they raise advisory flags, never hard failures.

use kip_core::{ConfigError, EntityRef, Fact, Flag, FlagSeverity, RunId};
use serde::{Deserialize, Serialize};

/// One side of a ratio: either a fact count or the sum of a numeric detail
/// field, scoped to domain (and optionally category).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// Domain to aggregate over
    pub domain: String,
    /// Restrict to one category; `None` covers the whole domain
    pub category: Option<String>,
    /// Sum this numeric detail field; `None` counts facts instead
    pub field: Option<String>,
}

impl Metric {
    /// Count facts in a domain.
    #[must_use]
    pub fn fact_count(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            category: None,
            field: None,
        }
    }

    /// Sum a numeric detail field over a domain's category.
    #[must_use]
    pub fn field_sum(domain: &str, category: &str, field: &str) -> Self {
        Self {
            domain: domain.to_string(),
            category: Some(category.to_string()),
            field: Some(field.to_string()),
        }
    }

    fn evaluate(&self, facts: &[Fact]) -> f64 {
        let scoped = facts.iter().filter(|f| {
            f.domain.eq_ignore_ascii_case(&self.domain)
                && self
                    .category
                    .as_deref()
                    .map_or(true, |c| f.category.eq_ignore_ascii_case(c))
        });
        match &self.field {
            Some(field) => scoped.filter_map(|f| f.numeric_detail(field)).sum(),
            None => scoped.count() as f64,
        }
    }
}

/// A configured bound on a cross-domain ratio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioBound {
    /// Name used in flag messages, e.g. `endpoints_per_staff`
    pub name: String,
    /// Numerator metric
    pub numerator: Metric,
    /// Denominator metric
    pub denominator: Metric,
    /// Lowest plausible value
    pub min: f64,
    /// Highest plausible value
    pub max: f64,
}

impl RatioBound {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min > self.max || !self.min.is_finite() || !self.max.is_finite() {
            return Err(ConfigError::InvalidBound {
                name: self.name.clone(),
                reason: format!("min {} / max {}", self.min, self.max),
            });
        }
        Ok(())
    }
}

/// Sanity-ratio checks across domains.
#[derive(Debug, Clone)]
pub struct CrossDomainValidator {
    bounds: Vec<RatioBound>,
}

impl CrossDomainValidator {
    /// Build a validator over configured bounds.
    ///
    /// # Errors
    /// `ConfigError::InvalidBound` for inverted or non-finite bounds.
    pub fn new(bounds: Vec<RatioBound>) -> Result<Self, ConfigError> {
        for b in &bounds {
            b.validate()?;
        }
        Ok(Self { bounds })
    }

    /// Check every configured ratio over the run's full fact set.
    ///
    /// A denominator of zero skips the ratio (there is nothing to divide by;
    /// missing data is the domain validator's business, not this one's).
    #[must_use]
    pub fn validate_run(&self, run: RunId, facts: &[Fact]) -> Vec<Flag> {
        let mut flags = Vec::new();
        for bound in &self.bounds {
            let numerator = bound.numerator.evaluate(facts);
            let denominator = bound.denominator.evaluate(facts);
            if denominator == 0.0 {
                continue;
            }
            let ratio = numerator / denominator;
            if ratio < bound.min || ratio > bound.max {
                flags.push(Flag::new(
                    "ratio_out_of_bounds",
                    FlagSeverity::Warning,
                    format!(
                        "{}: {ratio:.2} outside [{}, {}] ({numerator} / {denominator})",
                        bound.name, bound.min, bound.max
                    ),
                    EntityRef::Run(run),
                ));
            }
        }
        if !flags.is_empty() {
            tracing::info!(flag_count = flags.len(), "cross-domain ratios out of bounds");
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kip_test_utils::FactBuilder;

    fn endpoints_per_staff() -> RatioBound {
        RatioBound {
            name: "endpoints_per_staff".into(),
            numerator: Metric::field_sum("network", "endpoints", "count"),
            denominator: Metric::field_sum("hr", "headcount", "count"),
            min: 0.5,
            max: 5.0,
        }
    }

    #[test]
    fn inverted_bound_rejected() {
        let mut bound = endpoints_per_staff();
        bound.min = 10.0;
        assert!(CrossDomainValidator::new(vec![bound]).is_err());
    }

    #[test]
    fn out_of_bounds_ratio_flags_warning() {
        let validator = CrossDomainValidator::new(vec![endpoints_per_staff()]).unwrap();
        let facts = vec![
            FactBuilder::new("network", "endpoints", "laptops")
                .detail_num("count", 900.0)
                .build(),
            FactBuilder::new("hr", "headcount", "staff")
                .detail_num("count", 40.0)
                .build(),
        ];
        let flags = validator.validate_run(RunId::new(), &facts);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].severity, FlagSeverity::Warning);
        assert!(flags[0].message.contains("endpoints_per_staff"));
    }

    #[test]
    fn in_bounds_ratio_passes() {
        let validator = CrossDomainValidator::new(vec![endpoints_per_staff()]).unwrap();
        let facts = vec![
            FactBuilder::new("network", "endpoints", "laptops")
                .detail_num("count", 80.0)
                .build(),
            FactBuilder::new("hr", "headcount", "staff")
                .detail_num("count", 40.0)
                .build(),
        ];
        assert!(validator.validate_run(RunId::new(), &facts).is_empty());
    }

    #[test]
    fn zero_denominator_skipped() {
        let validator = CrossDomainValidator::new(vec![endpoints_per_staff()]).unwrap();
        let facts = vec![FactBuilder::new("network", "endpoints", "laptops")
            .detail_num("count", 900.0)
            .build()];
        assert!(validator.validate_run(RunId::new(), &facts).is_empty());
    }
}
