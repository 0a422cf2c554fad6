//! Error type for `kip-persist`.

use kip_core::{FactId, FindingId};
use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Database-level failure (transient; the writer retries these)
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    /// Entity (de)serialization failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored timestamp failed to parse on read-back
    #[error("date/time parse error: {0}")]
    DateParse(String),

    /// Stored ID failed to parse on read-back
    #[error("id parse error: {0}")]
    IdParse(String),

    /// A finding was written before the facts it cites were committed.
    /// Citation writes must be ordered after their facts; this fails the
    /// finding write, never the facts.
    #[error("finding {finding} cites uncommitted fact {missing}")]
    CitationOrdering {
        /// The finding being written
        finding: FindingId,
        /// The first cited fact with no committed row
        missing: FactId,
    },

    /// Bounded retry budget for a durable write exhausted
    #[error("write retries exhausted for `{key}` after {attempts} attempts")]
    RetriesExhausted {
        /// Idempotency key of the failed write
        key: String,
        /// Attempts made
        attempts: u32,
    },

    /// Run row missing on recovery
    #[error("run {0} not found in durable store")]
    RunNotFound(kip_core::RunId),
}

impl Error {
    /// Transient failures worth retrying with the same idempotency key.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Crate-local result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_violation_is_not_transient() {
        let err = Error::CitationOrdering {
            finding: FindingId::new("net", 1),
            missing: FactId::new("net", 9),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("F-NET-009"));
    }
}
