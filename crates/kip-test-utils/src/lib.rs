//! Testing utilities for the KIP workspace
//!
//! Shared builders and fixtures used by unit and integration tests.

#![allow(missing_docs)]

use chrono::Utc;
use kip_core::{
    EntityTag, Evidence, Fact, FactId, FactStatus, Finding, FindingKind, FindingStatus, RunId,
    Severity,
};
use kip_store::KnowledgeStore;

/// Builder for test facts. Defaults: primary entity, documented status,
/// confidence 0.9, fixture evidence.
#[derive(Debug, Clone)]
pub struct FactBuilder {
    fact: Fact,
}

impl FactBuilder {
    pub fn new(domain: &str, category: &str, item: &str) -> Self {
        Self {
            fact: Fact {
                id: FactId::new(domain, 1),
                run_id: RunId::new(),
                domain: domain.to_string(),
                category: category.to_string(),
                entity: EntityTag::Primary,
                item: item.to_string(),
                details: serde_json::Map::new(),
                status: FactStatus::Documented,
                evidence: Evidence::new("fixture.pdf", "fixture quote"),
                confidence: 0.9,
                updated_at: Utc::now(),
                links: Vec::new(),
            },
        }
    }

    pub fn id(mut self, id: FactId) -> Self {
        self.fact.id = id;
        self
    }

    pub fn run(mut self, run: RunId) -> Self {
        self.fact.run_id = run;
        self
    }

    pub fn entity(mut self, entity: EntityTag) -> Self {
        self.fact.entity = entity;
        self
    }

    pub fn status(mut self, status: FactStatus) -> Self {
        self.fact.status = status;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.fact.confidence = confidence;
        self
    }

    pub fn detail(mut self, key: &str, value: &str) -> Self {
        self.fact
            .details
            .insert(key.to_string(), serde_json::Value::from(value));
        self
    }

    pub fn detail_num(mut self, key: &str, value: f64) -> Self {
        self.fact
            .details
            .insert(key.to_string(), serde_json::Value::from(value));
        self
    }

    pub fn evidence(mut self, source_doc: &str, quote: &str) -> Self {
        self.fact.evidence = Evidence::new(source_doc, quote);
        self
    }

    pub fn no_evidence(mut self) -> Self {
        self.fact.evidence = Evidence::new("", "");
        self
    }

    pub fn build(self) -> Fact {
        self.fact
    }
}

/// A fact with a store-allocated ID, bound to `run`.
pub fn fact_with_run(
    store: &KnowledgeStore,
    run: RunId,
    domain: &str,
    category: &str,
    item: &str,
    confidence: f64,
) -> Fact {
    FactBuilder::new(domain, category, item)
        .id(store.allocate_fact_id(domain))
        .run(run)
        .confidence(confidence)
        .build()
}

/// A risk finding with a store-allocated ID citing `citations`.
pub fn finding_citing(
    store: &KnowledgeStore,
    run: RunId,
    domain: &str,
    citations: Vec<FactId>,
) -> Finding {
    Finding {
        id: store.allocate_finding_id(domain),
        run_id: run,
        domain: domain.to_string(),
        kind: FindingKind::Risk {
            severity: Severity::High,
            likelihood: 0.5,
        },
        title: "test risk".to_string(),
        rationale: "built from fixtures".to_string(),
        based_on_facts: citations,
        status: FindingStatus::Identified,
        updated_at: Utc::now(),
    }
}
