//! KIP Pipeline
//!
//! Orchestrates one analysis run: bounded concurrent domain producers feed
//! candidate facts through category checkpoints into the knowledge store,
//! each entity persisted the moment it lands. Failed validations loop
//! through targeted re-extraction with a hard attempt cap; exhausted items
//! escalate to the human review queue. Cross-domain validation and the
//! adversarial review wait behind a barrier until every producer is
//! terminal.

pub mod config;
pub mod coordinator;
pub mod generate;
pub mod producer;
pub mod review;
pub mod runner;

pub use config::PipelineConfig;
pub use coordinator::{ReextractionCoordinator, Resolution};
pub use generate::{
    admit_fact, admit_finding, readmit_fact, CandidateFact, CandidateFinding, GeneratedBatch,
    Generator,
};
pub use producer::ProducerPool;
pub use review::{HumanReviewQueue, PendingItem, QueueFilter};
pub use runner::{DomainJob, PipelineRunner, RunReport};
