//! Gaps - recorded absences and inconsistencies

use crate::ids::{FactId, GapId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of hole in the knowledge base this gap records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Expected information was not found in any source
    MissingInfo,
    /// Two facts appear to describe the same thing
    Overlap,
    /// Two facts materially disagree
    Conflict,
    /// Sources do not establish whether coverage exists
    CoverageUnknown,
    /// Sources do not establish who owns the item
    OwnershipUnknown,
}

/// How much a gap matters for the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    /// Cosmetic; resolve opportunistically
    Low,
    /// Worth a follow-up question
    Medium,
    /// Blocks a domain conclusion
    High,
    /// Blocks the overall analysis
    Critical,
}

/// A recorded absence or inconsistency in the facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    /// Stable, domain-scoped identifier
    pub id: GapId,
    /// Run this gap belongs to
    pub run_id: RunId,
    /// Subject-matter domain
    pub domain: String,
    /// Category within the domain
    pub category: String,
    /// Kind of hole
    pub kind: GapKind,
    /// Facts that triggered detection
    pub related_facts: Vec<FactId>,
    /// Importance level
    pub impact: Impact,
    /// What a resolver should go look for
    pub guidance: String,
    /// Set once a later fact or a human addresses the gap
    pub resolved: bool,
    /// How it was resolved, when `resolved`
    pub resolution_note: Option<String>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Gap {
    /// Mark the gap addressed.
    pub fn resolve(&mut self, note: impl Into<String>) {
        self.resolved = true;
        self.resolution_note = Some(note.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impact_ordering() {
        assert!(Impact::Critical > Impact::High);
        assert!(Impact::Medium > Impact::Low);
    }

    #[test]
    fn resolve_records_note() {
        let mut gap = Gap {
            id: GapId::new("net", 1),
            run_id: RunId::new(),
            domain: "net".into(),
            category: "firewalls".into(),
            kind: GapKind::Conflict,
            related_facts: vec![],
            impact: Impact::High,
            guidance: "confirm vendor with both parties".into(),
            resolved: false,
            resolution_note: None,
            updated_at: Utc::now(),
        };
        gap.resolve("counterparty confirmed migration");
        assert!(gap.resolved);
        assert!(gap.resolution_note.as_deref().unwrap().contains("confirmed"));
    }
}
