//! Validation records and the review state machine
//!
//! One record per fact/finding tracks where the item is in the
//! extract -> validate -> retry -> review lifecycle. Illegal transitions are
//! errors, not panics, so callers can route them into escalation.

use crate::audit::EntityRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Review lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    /// Freshly produced by the generation process
    Extracted,
    /// Passed automated validation
    AiValidated,
    /// Failed validation; targeted regeneration requested
    ReextractPending,
    /// Automated attempts exhausted; waiting on a human
    HumanPending,
    /// Terminal: human confirmed as-is
    Confirmed,
    /// Terminal: human corrected the value
    Corrected,
    /// Terminal: human rejected; entity stays queryable
    Rejected,
}

impl ValidationState {
    /// True for the three terminal states.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Corrected | Self::Rejected)
    }
}

/// Attempted illegal state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal validation transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    /// Current state
    pub from: ValidationState,
    /// Requested state
    pub to: ValidationState,
}

/// States reachable from `from`.
#[must_use]
pub fn allowed_transitions(from: ValidationState) -> Vec<ValidationState> {
    use ValidationState::*;
    match from {
        Extracted => vec![AiValidated, ReextractPending],
        AiValidated => vec![ReextractPending, Confirmed, Corrected, Rejected],
        ReextractPending => vec![AiValidated, HumanPending],
        HumanPending => vec![Confirmed, Corrected, Rejected],
        Confirmed | Corrected | Rejected => vec![],
    }
}

/// Validate a state transition.
pub fn validate_transition(
    from: ValidationState,
    to: ValidationState,
) -> Result<(), IllegalTransition> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

/// Severity of a validation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    /// FYI only
    Info,
    /// Advisory; item remains usable
    Warning,
    /// Item should not be relied on until resolved
    Error,
    /// Item must be resolved before the run can complete cleanly
    Critical,
}

/// Non-fatal validation warning attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    /// Machine-readable code, e.g. `unverified_citations`
    pub code: String,
    /// Severity level
    pub severity: FlagSeverity,
    /// Human-readable explanation with the evidence that triggered it
    pub message: String,
    /// The flagged entity
    pub entity: EntityRef,
}

impl Flag {
    /// Build a flag.
    pub fn new(
        code: impl Into<String>,
        severity: FlagSeverity,
        message: impl Into<String>,
        entity: EntityRef,
    ) -> Self {
        Self {
            code: code.into(),
            severity,
            message: message.into(),
            entity,
        }
    }
}

/// Per-entity validation tracking record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// The tracked entity
    pub entity: EntityRef,
    /// Current lifecycle state
    pub state: ValidationState,
    /// Automated re-extraction attempts so far
    pub attempt_count: u32,
    /// Flags raised against the entity
    pub flags: Vec<Flag>,
    /// Last transition time
    pub updated_at: DateTime<Utc>,
}

impl ValidationRecord {
    /// Fresh record for a newly extracted entity.
    #[must_use]
    pub fn extracted(entity: EntityRef) -> Self {
        Self {
            entity,
            state: ValidationState::Extracted,
            attempt_count: 0,
            flags: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Transition to `to`, enforcing the legality table.
    pub fn transition(&mut self, to: ValidationState) -> Result<(), IllegalTransition> {
        validate_transition(self.state, to)?;
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Worst severity among raised flags, if any.
    #[must_use]
    pub fn worst_severity(&self) -> Option<FlagSeverity> {
        self.flags.iter().map(|f| f.severity).max()
    }
}
