//! The external generation boundary.
//!
//! Candidates arriving from the generation process are untrusted: they carry
//! raw string tags and unchecked fields, and are converted into store
//! entities only after their intake preconditions pass. A candidate with an
//! unrecognized entity tag is rejected, never defaulted.

use async_trait::async_trait;
use kip_core::{
    EntityTag, Evidence, Fact, FactId, FactStatus, Finding, FindingKind, FindingStatus, KipError,
    RunId,
};
use kip_store::KnowledgeStore;
use serde::{Deserialize, Serialize};

/// A raw extracted fact, before intake validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFact {
    /// Category within the producing domain
    pub category: String,
    /// Raw entity tag string; must parse to a known [`EntityTag`]
    pub entity: String,
    /// Item text
    pub item: String,
    /// Structured attributes
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
    /// Claimed lifecycle status
    #[serde(default = "default_status")]
    pub status: FactStatus,
    /// Source document reference
    pub source_doc: String,
    /// Exact quoted span
    pub quote: String,
    /// Extraction confidence
    pub confidence: f64,
}

fn default_status() -> FactStatus {
    FactStatus::Documented
}

/// A raw derived conclusion, before citation checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFinding {
    /// Variant-specific payload
    pub kind: FindingKind,
    /// Short title
    pub title: String,
    /// Free-text rationale
    pub rationale: String,
    /// Cited fact IDs; must resolve in the live store
    pub cites: Vec<FactId>,
}

/// One generation call's output for a domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratedBatch {
    /// Candidate facts, grouped by arrival order
    pub facts: Vec<CandidateFact>,
    /// Candidate findings citing the facts above (or earlier ones)
    pub findings: Vec<CandidateFinding>,
}

/// The external generation process.
///
/// Implementations wrap whatever produces candidate entities (an LLM call in
/// production, a scripted double in tests). The pipeline imposes its own
/// timeout around every call; implementations need not.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce candidates for one domain from the given source documents.
    async fn generate(
        &self,
        domain: &str,
        document_refs: &[String],
    ) -> Result<GeneratedBatch, KipError>;

    /// Targeted retry: regenerate only the offending fact, with validator
    /// context describing what was wrong. Never re-runs the whole batch.
    async fn regenerate(
        &self,
        hint: &FactId,
        context: &str,
    ) -> Result<Vec<CandidateFact>, KipError>;
}

/// Convert a candidate into a store fact with a freshly allocated ID.
///
/// # Errors
/// `InputDefect::UnknownEntityTag` for an unrecognized tag. Evidence and
/// confidence preconditions are enforced by `put_fact`, not here.
pub fn admit_fact(
    store: &KnowledgeStore,
    run: RunId,
    domain: &str,
    candidate: CandidateFact,
) -> Result<Fact, KipError> {
    let entity: EntityTag = candidate.entity.parse().map_err(KipError::Input)?;
    Ok(Fact {
        id: store.allocate_fact_id(domain),
        run_id: run,
        domain: domain.to_string(),
        category: candidate.category,
        entity,
        item: candidate.item,
        details: candidate.details,
        status: candidate.status,
        evidence: Evidence::new(candidate.source_doc, candidate.quote),
        confidence: candidate.confidence,
        updated_at: chrono::Utc::now(),
        links: Vec::new(),
    })
}

/// Rebuild a fact from a regeneration candidate, keeping the original's
/// stable ID so the store treats it as an update, not a new row.
///
/// # Errors
/// `InputDefect::UnknownEntityTag` for an unrecognized tag.
pub fn readmit_fact(
    original: &Fact,
    candidate: CandidateFact,
) -> Result<Fact, KipError> {
    let entity: EntityTag = candidate.entity.parse().map_err(KipError::Input)?;
    Ok(Fact {
        id: original.id.clone(),
        run_id: original.run_id,
        domain: original.domain.clone(),
        category: candidate.category,
        entity,
        item: candidate.item,
        details: candidate.details,
        status: candidate.status,
        evidence: Evidence::new(candidate.source_doc, candidate.quote),
        confidence: candidate.confidence,
        updated_at: chrono::Utc::now(),
        links: original.links.clone(),
    })
}

/// Convert a candidate finding; citation integrity is enforced by
/// `put_finding`, which owns the fail-fast/permissive decision.
#[must_use]
pub fn admit_finding(
    store: &KnowledgeStore,
    run: RunId,
    domain: &str,
    candidate: CandidateFinding,
) -> Finding {
    Finding {
        id: store.allocate_finding_id(domain),
        run_id: run,
        domain: domain.to_string(),
        kind: candidate.kind,
        title: candidate.title,
        rationale: candidate.rationale,
        based_on_facts: candidate.cites,
        status: FindingStatus::Identified,
        updated_at: chrono::Utc::now(),
    }
}
