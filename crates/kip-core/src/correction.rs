//! Corrections - appended edits that never overwrite history

use crate::audit::EntityRef;
use crate::ids::CorrectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded edit to a fact/finding value. The original value travels with
/// the correction, so no mutation is ever destructive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    /// Unique correction ID
    pub id: CorrectionId,
    /// The corrected entity
    pub entity: EntityRef,
    /// Which field changed, e.g. `details.version`
    pub field: String,
    /// Value before the edit
    pub original: serde_json::Value,
    /// Value after the edit
    pub new: serde_json::Value,
    /// Who made the edit
    pub actor: String,
    /// Why
    pub reason: String,
    /// When
    pub at: DateTime<Utc>,
}

impl Correction {
    /// Build a correction stamped `now`.
    pub fn now(
        entity: EntityRef,
        field: impl Into<String>,
        original: serde_json::Value,
        new: serde_json::Value,
        actor: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: CorrectionId::new(),
            entity,
            field: field.into(),
            original,
            new,
            actor: actor.into(),
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}
