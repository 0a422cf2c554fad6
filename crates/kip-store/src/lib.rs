//! KIP Knowledge Store
//!
//! In-memory, concurrency-safe store of facts, gaps and findings with:
//! - Per domain+category sharding of ID assignment and duplicate indexes
//! - Duplicate detection (normalized key + weighted similarity), never silent
//! - Automatic conflict gaps when parties disagree on the same item
//! - A reverse citation index for O(1) amortized `find_citing`
//! - A hash-chained, append-only audit trail
//!
//! The store exclusively owns entity lifecycle. Validators read facts and
//! write flags; the review queue is the only caller allowed to move a
//! validation record out of `HumanPending`.

pub mod audit;
pub mod conflict;
pub mod dedup;
pub mod store;

pub use audit::{AuditTrail, ChainedEvent, IntegrityViolation};
pub use conflict::ConflictCheck;
pub use dedup::{normalized_key, similarity};
pub use store::{
    CitationMode, Committed, FactAcceptance, FindingAcceptance, KnowledgeStore, StoreConfig,
};
