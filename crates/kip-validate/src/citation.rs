//! Citation validation against the live knowledge store
//!
//! Always evaluated against the store, never short-circuited: constructing a
//! validator without a store reference is a `ConfigError`, because a
//! citation checker that answers "all valid" when it cannot look anything up
//! is worse than no checker at all.

use kip_core::{ConfigError, FactId, InputDefect, KipError};
use kip_store::{CitationMode, KnowledgeStore};
use std::sync::Arc;

/// Result of checking a citation list.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationReport {
    /// Citations that resolved to live, non-rejected facts
    pub valid: Vec<FactId>,
    /// Citations that did not resolve
    pub invalid: Vec<FactId>,
    /// `valid.len() / total` in `[0.0, 1.0]`
    pub rate: f64,
}

impl CitationReport {
    /// True when every citation resolved.
    #[inline]
    #[must_use]
    pub fn all_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Checks that cited fact IDs resolve in the live store.
#[derive(Debug, Clone)]
pub struct CitationValidator {
    store: Arc<KnowledgeStore>,
    mode: CitationMode,
}

impl CitationValidator {
    /// Build a validator.
    ///
    /// # Errors
    /// `ConfigError::StoreUnavailable` when `store` is `None`; callers
    /// must abort startup, not fall back to pass-through.
    pub fn new(
        store: Option<Arc<KnowledgeStore>>,
        mode: CitationMode,
    ) -> Result<Self, ConfigError> {
        let store = store.ok_or(ConfigError::StoreUnavailable)?;
        Ok(Self { store, mode })
    }

    /// The configured mode.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> CitationMode {
        self.mode
    }

    /// Validate a citation list against the live store.
    ///
    /// # Errors
    /// Under fail-fast mode, the first unresolvable ID is returned as
    /// `InputDefect::InvalidCitation`. Permissive mode always returns a
    /// report; unresolved IDs are listed in `invalid`.
    pub fn validate_citations(&self, fact_ids: &[FactId]) -> Result<CitationReport, KipError> {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for id in fact_ids {
            if self.store.citation_resolves(id) {
                valid.push(id.clone());
            } else {
                invalid.push(id.clone());
            }
        }

        if self.mode == CitationMode::FailFast {
            if let Some(first) = invalid.first() {
                return Err(InputDefect::InvalidCitation {
                    fact_id: first.clone(),
                }
                .into());
            }
        }

        let total = fact_ids.len();
        let rate = if total == 0 {
            0.0
        } else {
            valid.len() as f64 / total as f64
        };
        Ok(CitationReport {
            valid,
            invalid,
            rate,
        })
    }
}
