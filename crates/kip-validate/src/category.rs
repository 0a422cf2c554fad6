//! Category completeness checkpoints
//!
//! Runs per batch, right after a category's facts are produced. Produces
//! flags, not exceptions: an undercount is a data-quality signal the
//! coordinator acts on, not a crash.

use kip_core::{ConfigError, EntityRef, Fact, Flag, FlagSeverity};
use serde::{Deserialize, Serialize};

/// Declared expectation for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryExpectation {
    /// Category name
    pub category: String,
    /// Minimum plausible item count
    pub min_items: usize,
    /// Maximum plausible item count
    pub max_items: usize,
    /// Detail fields every fact in this category must carry, non-empty
    pub required_fields: Vec<String>,
}

impl CategoryExpectation {
    /// Declare an expectation.
    #[must_use]
    pub fn new(category: &str, min_items: usize, max_items: usize) -> Self {
        Self {
            category: category.to_string(),
            min_items,
            max_items,
            required_fields: Vec::new(),
        }
    }

    /// Require a detail field to be present and non-empty.
    #[must_use]
    pub fn require_field(mut self, field: &str) -> Self {
        self.required_fields.push(field.to_string());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_items > self.max_items {
            return Err(ConfigError::InvalidBound {
                name: format!("category `{}` item count", self.category),
                reason: format!("min {} > max {}", self.min_items, self.max_items),
            });
        }
        Ok(())
    }
}

/// Per-category completeness validator.
#[derive(Debug, Clone)]
pub struct CategoryValidator {
    expectations: Vec<CategoryExpectation>,
}

impl CategoryValidator {
    /// Build a validator over declared expectations.
    ///
    /// # Errors
    /// `ConfigError::InvalidBound` for a min/max inversion; misconfiguration
    /// aborts startup.
    pub fn new(expectations: Vec<CategoryExpectation>) -> Result<Self, ConfigError> {
        for e in &expectations {
            e.validate()?;
        }
        Ok(Self { expectations })
    }

    /// Expectation declared for `category`, if any.
    #[must_use]
    pub fn expectation(&self, category: &str) -> Option<&CategoryExpectation> {
        self.expectations
            .iter()
            .find(|e| e.category.eq_ignore_ascii_case(category))
    }

    /// Validate one category's batch of facts.
    ///
    /// Returns flags; an empty vec means the batch passed. Facts with flags
    /// remain stored and queryable.
    #[must_use]
    pub fn validate_batch(&self, category: &str, facts: &[Fact]) -> Vec<Flag> {
        let Some(expectation) = self.expectation(category) else {
            return Vec::new();
        };
        let mut flags = Vec::new();

        let batch_entity = facts
            .first()
            .map(|f| EntityRef::Fact(f.id.clone()))
            .unwrap_or_else(|| EntityRef::Run(kip_core::RunId(uuid::Uuid::nil())));

        if facts.len() < expectation.min_items {
            flags.push(Flag::new(
                "category_undercount",
                FlagSeverity::Error,
                format!(
                    "category `{category}` produced {} items, expected at least {}",
                    facts.len(),
                    expectation.min_items
                ),
                batch_entity.clone(),
            ));
        } else if facts.len() > expectation.max_items {
            flags.push(Flag::new(
                "category_overcount",
                FlagSeverity::Warning,
                format!(
                    "category `{category}` produced {} items, expected at most {}",
                    facts.len(),
                    expectation.max_items
                ),
                batch_entity,
            ));
        }

        for fact in facts {
            for field in &expectation.required_fields {
                let present = fact
                    .details
                    .get(field)
                    .map(|v| match v {
                        serde_json::Value::String(s) => !s.trim().is_empty(),
                        serde_json::Value::Null => false,
                        _ => true,
                    })
                    .unwrap_or(false);
                if !present {
                    flags.push(Flag::new(
                        "missing_required_field",
                        FlagSeverity::Error,
                        format!("fact {} is missing required field `{field}`", fact.id),
                        EntityRef::Fact(fact.id.clone()),
                    ));
                }
            }
        }

        if !flags.is_empty() {
            tracing::debug!(
                category,
                flag_count = flags.len(),
                "category checkpoint raised flags"
            );
        }
        flags
    }
}
