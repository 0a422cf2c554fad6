//! Error taxonomy
//!
//! Four classes with different propagation policies:
//! - Input defects: rejected synchronously, never coerced to defaults
//! - Consistency defects: surfaced as flags, pipeline continues
//! - Infrastructure failures: retried with bounded backoff, then escalated
//! - Configuration errors: fatal at startup, never a silent degrade

use crate::ids::{FactId, FindingId};
use crate::record::IllegalTransition;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum KipError {
    /// Malformed candidate entity; rejected at intake
    #[error("input defect: {0}")]
    Input(#[from] InputDefect),

    /// Transient infrastructure failure; retryable
    #[error("infrastructure failure: {0}")]
    Infra(#[from] InfraError),

    /// Fatal misconfiguration; abort at startup
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Illegal validation state transition
    #[error("state machine error: {0}")]
    Transition(#[from] IllegalTransition),

    /// Automated attempts exhausted; item handed to human review
    #[error("escalated to human review: {entity}")]
    Escalated {
        /// Display form of the escalated entity
        entity: String,
    },
}

impl KipError {
    /// Whether a retry with backoff is worth attempting.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Infra(_))
    }

    /// Whether the item must go to the human review queue.
    #[inline]
    #[must_use]
    pub fn requires_human(&self) -> bool {
        matches!(self, Self::Escalated { .. })
    }
}

/// Malformed candidate fact/finding. Each variant names the defect and the
/// evidence, so rejections are never a generic "processing error".
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputDefect {
    /// Required field empty or absent
    #[error("missing required field `{field}`")]
    MissingField {
        /// The absent field
        field: String,
    },

    /// Entity tag not in the accepted vocabulary
    #[error("unknown entity tag `{tag}` (expected primary|counterparty|shared)")]
    UnknownEntityTag {
        /// The offending tag
        tag: String,
    },

    /// Fact submitted without a traceable source reference + quote
    #[error("fact has no traceable evidence (source document and quote required)")]
    MissingEvidence,

    /// Finding cites a fact that does not resolve in the live store
    #[error("invalid citation: {fact_id} does not resolve to a live fact")]
    InvalidCitation {
        /// The unresolvable citation
        fact_id: FactId,
    },

    /// Finding submitted with an empty citation list
    #[error("finding {finding_id} cites no facts")]
    EmptyCitations {
        /// The citation-free finding
        finding_id: FindingId,
    },

    /// Confidence outside `[0.0, 1.0]`
    #[error("confidence {value} outside [0.0, 1.0]")]
    ConfidenceOutOfRange {
        /// The offending value
        value: f64,
    },
}

/// Transient infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    /// Durable write failed
    #[error("storage write failed: {0}")]
    StorageWrite(String),

    /// Durable read failed
    #[error("storage read failed: {0}")]
    StorageRead(String),

    /// External generation call exceeded its deadline
    #[error("generation timed out after {timeout_secs}s for domain `{domain}`")]
    GenerationTimeout {
        /// The producer's domain
        domain: String,
        /// Configured deadline
        timeout_secs: u64,
    },

    /// External generation call failed outright
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// Retry budget for a durable write exhausted
    #[error("write retries exhausted for {entity} after {attempts} attempts")]
    RetriesExhausted {
        /// Display form of the entity
        entity: String,
        /// Attempts made
        attempts: u32,
    },
}

/// Fatal configuration errors. Raised at startup, never worked around.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Citation validator constructed without a knowledge store
    #[error("citation validator has no knowledge store; refusing to treat all citations as valid")]
    StoreUnavailable,

    /// Nonsensical numeric bound
    #[error("invalid bound for `{name}`: {reason}")]
    InvalidBound {
        /// The misconfigured setting
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Zero-sized worker pool or retry budget
    #[error("`{name}` must be at least 1")]
    MustBePositive {
        /// The misconfigured setting
        name: String,
    },
}
