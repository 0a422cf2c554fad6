//! Pipeline configuration, validated at startup.

use kip_core::ConfigError;
use kip_store::CitationMode;
use kip_validate::{AdversarialConfig, CategoryExpectation, DomainExpectation, RatioBound};
use std::time::Duration;

/// Everything the runner needs to know up front. A misconfiguration aborts
/// construction; nothing here is worked around at runtime.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Domain producers allowed in flight at once
    pub max_producers: usize,
    /// Re-extraction attempts per entity before forced escalation
    pub max_reextract_attempts: u32,
    /// Deadline for one external generation call
    pub generation_timeout: Duration,
    /// First re-extraction backoff delay
    pub backoff_base_ms: u64,
    /// Backoff ceiling
    pub backoff_cap_ms: u64,
    /// Citation enforcement mode for finding intake
    pub citation_mode: CitationMode,
    /// Per-category completeness expectations
    pub category_expectations: Vec<CategoryExpectation>,
    /// Per-domain required categories
    pub domain_expectations: Vec<DomainExpectation>,
    /// Cross-domain sanity ratios
    pub ratio_bounds: Vec<RatioBound>,
    /// Adversarial review thresholds
    pub adversarial: AdversarialConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_producers: 3,
            max_reextract_attempts: 3,
            generation_timeout: Duration::from_secs(60),
            backoff_base_ms: 200,
            backoff_cap_ms: 5_000,
            citation_mode: CitationMode::FailFast,
            category_expectations: Vec::new(),
            domain_expectations: Vec::new(),
            ratio_bounds: Vec::new(),
            adversarial: AdversarialConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Check every knob before the pipeline starts.
    ///
    /// # Errors
    /// `ConfigError` naming the offending setting. Expectation and ratio
    /// internals are re-validated when the validators are built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_producers == 0 {
            return Err(ConfigError::MustBePositive {
                name: "max_producers".into(),
            });
        }
        if self.max_reextract_attempts == 0 {
            return Err(ConfigError::MustBePositive {
                name: "max_reextract_attempts".into(),
            });
        }
        if self.generation_timeout.is_zero() {
            return Err(ConfigError::MustBePositive {
                name: "generation_timeout".into(),
            });
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(ConfigError::InvalidBound {
                name: "backoff".into(),
                reason: format!(
                    "base {}ms exceeds cap {}ms",
                    self.backoff_base_ms, self.backoff_cap_ms
                ),
            });
        }
        Ok(())
    }
}
