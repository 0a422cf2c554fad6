//! Domain-level consistency validation
//!
//! Runs after all categories in a domain are persisted. Checks required
//! categories are present and applies registered consistency rules, e.g.
//! declared headcount must cover the number of individually named roles.

use kip_core::{EntityRef, Fact, Flag, FlagSeverity, RunId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared expectation for one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainExpectation {
    /// Domain name
    pub domain: String,
    /// Categories that must have at least one fact
    pub required_categories: Vec<String>,
}

impl DomainExpectation {
    /// Declare an expectation.
    #[must_use]
    pub fn new(domain: &str, required_categories: &[&str]) -> Self {
        Self {
            domain: domain.to_string(),
            required_categories: required_categories.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A domain-specific consistency rule over the domain's full fact set.
pub trait DomainRule: Send + Sync {
    /// Rule name used in flag messages.
    fn name(&self) -> &str;

    /// Check the rule; `None` means it holds.
    fn check(&self, facts: &[Fact]) -> Option<Flag>;
}

impl fmt::Debug for dyn DomainRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainRule({})", self.name())
    }
}

/// Builtin rule: a declared aggregate count must cover the number of
/// individually named facts (headcount vs named roles, tool count vs named
/// tools).
#[derive(Debug, Clone)]
pub struct DeclaredCountCoversNamed {
    /// Category holding the declared aggregate
    pub declared_category: String,
    /// Numeric detail field carrying the declared count
    pub count_field: String,
    /// Category whose facts are individually named instances
    pub named_category: String,
}

impl DomainRule for DeclaredCountCoversNamed {
    fn name(&self) -> &str {
        "declared_count_covers_named"
    }

    fn check(&self, facts: &[Fact]) -> Option<Flag> {
        let declared: f64 = facts
            .iter()
            .filter(|f| f.category.eq_ignore_ascii_case(&self.declared_category))
            .filter_map(|f| f.numeric_detail(&self.count_field))
            .sum();
        if declared == 0.0 {
            return None; // nothing declared, nothing to reconcile
        }
        let named = facts
            .iter()
            .filter(|f| f.category.eq_ignore_ascii_case(&self.named_category))
            .count();
        if (named as f64) > declared {
            let entity = facts
                .first()
                .map(|f| EntityRef::Fact(f.id.clone()))
                .unwrap_or_else(|| EntityRef::Run(RunId(uuid::Uuid::nil())));
            return Some(Flag::new(
                self.name(),
                FlagSeverity::Warning,
                format!(
                    "`{}` declares {declared} via `{}` but `{}` names {named} instances",
                    self.declared_category, self.count_field, self.named_category
                ),
                entity,
            ));
        }
        None
    }
}

/// Cross-category validator for one domain.
pub struct DomainValidator {
    expectations: Vec<DomainExpectation>,
    rules: Vec<Box<dyn DomainRule>>,
}

impl fmt::Debug for DomainValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainValidator")
            .field("expectations", &self.expectations)
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl DomainValidator {
    /// Build a validator over declared expectations.
    #[must_use]
    pub fn new(expectations: Vec<DomainExpectation>) -> Self {
        Self {
            expectations,
            rules: Vec::new(),
        }
    }

    /// Register a consistency rule.
    #[must_use]
    pub fn with_rule(mut self, rule: Box<dyn DomainRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Validate one domain's persisted fact set.
    #[must_use]
    pub fn validate_domain(&self, domain: &str, facts: &[Fact]) -> Vec<Flag> {
        let mut flags = Vec::new();

        if let Some(expectation) = self
            .expectations
            .iter()
            .find(|e| e.domain.eq_ignore_ascii_case(domain))
        {
            let entity = facts
                .first()
                .map(|f| EntityRef::Fact(f.id.clone()))
                .unwrap_or_else(|| EntityRef::Run(RunId(uuid::Uuid::nil())));
            for category in &expectation.required_categories {
                let present = facts
                    .iter()
                    .any(|f| f.category.eq_ignore_ascii_case(category));
                if !present {
                    flags.push(Flag::new(
                        "missing_required_category",
                        FlagSeverity::Error,
                        format!("domain `{domain}` has no facts in required category `{category}`"),
                        entity.clone(),
                    ));
                }
            }
        }

        for rule in &self.rules {
            if let Some(flag) = rule.check(facts) {
                flags.push(flag);
            }
        }

        if !flags.is_empty() {
            tracing::debug!(domain, flag_count = flags.len(), "domain validation flags");
        }
        flags
    }
}
