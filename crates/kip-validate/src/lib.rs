//! KIP Validation Pipeline
//!
//! Four layers, run in order:
//! 1. Category - per-batch completeness checkpoints
//! 2. Domain - cross-category consistency within one domain
//! 3. Cross-domain - sanity-ratio heuristics across domains
//! 4. Adversarial - a red-team pass over the whole run
//!
//! Layers 2-4 produce advisory [`Flag`]s, never hard failures. Citation
//! validation is the exception: under fail-fast mode an invalid citation is a
//! typed rejection, and a validator constructed without a reachable store is
//! a fatal configuration error - there is no "treat everything as valid"
//! degradation.
//!
//! [`Flag`]: kip_core::Flag

pub mod adversarial;
pub mod category;
pub mod citation;
pub mod cross_domain;
pub mod domain;

pub use adversarial::{AdversarialConfig, AdversarialReviewer};
pub use category::{CategoryExpectation, CategoryValidator};
pub use citation::{CitationReport, CitationValidator};
pub use cross_domain::{CrossDomainValidator, Metric, RatioBound};
pub use domain::{DeclaredCountCoversNamed, DomainExpectation, DomainRule, DomainValidator};
