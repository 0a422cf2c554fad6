//! Findings - derived conclusions that must cite facts
//!
//! A finding with no valid citations is not knowledge, it is an opinion; the
//! store rejects it outright under fail-fast citation mode. Type-specific
//! fields live on the `FindingKind` variants so a work item cannot carry a
//! risk severity and vice versa.

use crate::ids::{FactId, FindingId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    /// Produced by extraction, not yet reviewed
    Identified,
    /// Confirmed by review
    Confirmed,
    /// Accepted into the remediation plan
    Accepted,
    /// Addressed
    Mitigated,
    /// Terminal: rejected by review; kept queryable
    Rejected,
}

/// Risk severity ladder. Business meaning of each rung is out of scope here;
/// ordering is what validators rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Low,
    /// Should be addressed
    Medium,
    /// Must be addressed
    High,
    /// Deal-affecting
    Critical,
}

/// Variant-specific payload of a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingKind {
    /// A risk to surface
    Risk {
        /// How bad if it materialises
        severity: Severity,
        /// How likely to materialise, `[0.0, 1.0]`
        likelihood: f64,
    },
    /// Concrete integration/remediation work
    WorkItem {
        /// Delivery phase label, e.g. `day-1`
        phase: String,
        /// Effort estimate in person-days
        effort_days: f64,
    },
    /// A recommended action
    Recommendation {
        /// Relative priority, 1 = highest
        priority: u8,
    },
    /// A strategic observation
    StrategicNote {
        /// Time horizon label, e.g. `12-months`
        horizon: String,
    },
}

impl FindingKind {
    /// Discriminant name used for queries and persistence.
    #[must_use]
    pub fn discriminant(&self) -> &'static str {
        match self {
            Self::Risk { .. } => "risk",
            Self::WorkItem { .. } => "work_item",
            Self::Recommendation { .. } => "recommendation",
            Self::StrategicNote { .. } => "strategic_note",
        }
    }
}

/// A derived conclusion citing one or more facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable, domain-scoped identifier
    pub id: FindingId,
    /// Run this finding belongs to
    pub run_id: RunId,
    /// Subject-matter domain
    pub domain: String,
    /// Variant payload
    pub kind: FindingKind,
    /// Short title
    pub title: String,
    /// Free-text rationale
    pub rationale: String,
    /// Cited fact IDs; the citation-integrity invariant lives here
    pub based_on_facts: Vec<FactId>,
    /// Lifecycle status
    pub status: FindingStatus,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Finding {
    /// True once the finding has reached its terminal rejected status.
    #[inline]
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.status == FindingStatus::Rejected
    }
}
