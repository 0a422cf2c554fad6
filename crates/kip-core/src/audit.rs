//! Audit events - the write-once history of every mutation

use crate::ids::{CorrectionId, EventId, FactId, FindingId, GapId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to any auditable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    /// A fact
    Fact(FactId),
    /// A gap
    Gap(GapId),
    /// A finding
    Finding(FindingId),
    /// A correction
    Correction(CorrectionId),
    /// An analysis run
    Run(RunId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fact(id) => write!(f, "fact:{id}"),
            Self::Gap(id) => write!(f, "gap:{id}"),
            Self::Finding(id) => write!(f, "finding:{id}"),
            Self::Correction(id) => write!(f, "correction:{id}"),
            Self::Run(id) => write!(f, "run:{id}"),
        }
    }
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Entity created by extraction
    Extracted,
    /// Existing entity re-written (same stable ID, last-write-wins fields)
    Updated,
    /// Gap synthesized by a validator or generated alongside facts
    GapRecorded,
    /// Automated validation pass recorded
    Validated,
    /// Flag attached
    Flagged,
    /// Near-duplicate merged; loser linked, not dropped
    DuplicateMerged,
    /// Conflict gap emitted
    ConflictDetected,
    /// Targeted regeneration requested
    ReextractRequested,
    /// Escalated to the human review queue
    Escalated,
    /// Human confirmed
    Confirmed,
    /// Human corrected; a Correction records the old value
    Corrected,
    /// Human rejected; terminal, entity kept
    RejectedByReview,
    /// Rejected synchronously at the door (input defect)
    RejectedAtIntake,
    /// Gap marked addressed
    GapResolved,
    /// Run status changed
    RunStatusChanged,
}

/// One append-only record of a mutation: who, what, when, why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub event_id: EventId,
    /// When it happened
    pub at: DateTime<Utc>,
    /// Run scope
    pub run_id: RunId,
    /// The mutated entity
    pub entity: EntityRef,
    /// What happened
    pub action: AuditAction,
    /// Who did it: `pipeline`, `validator:<name>`, or a reviewer handle
    pub actor: String,
    /// Why / supporting detail
    pub detail: String,
}

impl AuditEvent {
    /// Build an event stamped `now`.
    pub fn now(
        run_id: RunId,
        entity: EntityRef,
        action: AuditAction,
        actor: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            at: Utc::now(),
            run_id,
            entity,
            action,
            actor: actor.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ref_display() {
        let fact = EntityRef::Fact(FactId::new("net", 3));
        assert_eq!(fact.to_string(), "fact:F-NET-003");
    }

    #[test]
    fn event_serializes() {
        let ev = AuditEvent::now(
            RunId::new(),
            EntityRef::Fact(FactId::new("net", 1)),
            AuditAction::Extracted,
            "pipeline",
            "initial extraction",
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["action"], "extracted");
        assert_eq!(json["entity"]["type"], "fact");
    }
}
