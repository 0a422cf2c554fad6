//! KIP Core - shared entity model
//!
//! Defines the fundamental types for the knowledge base:
//! - Typed, domain-scoped identifiers
//! - Facts, gaps and findings with their lifecycles
//! - Validation records and the review state machine
//! - Corrections and audit events (append-only history)
//! - The error taxonomy shared by every other crate

pub mod audit;
pub mod correction;
pub mod error;
pub mod fact;
pub mod finding;
pub mod gap;
pub mod ids;
pub mod record;
pub mod run;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use audit::{AuditAction, AuditEvent, EntityRef};
pub use correction::Correction;
pub use error::{ConfigError, InfraError, InputDefect, KipError};
pub use fact::{EntityTag, Evidence, Fact, FactLink, FactStatus, LinkKind};
pub use finding::{Finding, FindingKind, FindingStatus, Severity};
pub use gap::{Gap, GapKind, Impact};
pub use ids::{CorrectionId, EventId, FactId, FindingId, GapId, RunId};
pub use record::{Flag, FlagSeverity, IllegalTransition, ValidationRecord, ValidationState};
pub use run::{AnalysisRun, RunStatus};
