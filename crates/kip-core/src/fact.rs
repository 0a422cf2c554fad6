//! Facts - atomic observations with evidence
//!
//! A fact is the unit of everything downstream: findings cite facts, gaps
//! reference facts, validators read facts. A fact without evidence is not a
//! fact and is rejected at the door.

use crate::error::InputDefect;
use crate::ids::{FactId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which party of the engagement a fact describes.
///
/// Unrecognized tags are rejected, never defaulted: conflating the primary
/// party with the counterparty silently poisons every downstream comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTag {
    /// The organisation under analysis
    Primary,
    /// The other party (acquirer, vendor, partner)
    Counterparty,
    /// Facts describing both parties jointly (e.g. a shared contract)
    Shared,
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Primary => "primary",
            Self::Counterparty => "counterparty",
            Self::Shared => "shared",
        };
        f.write_str(s)
    }
}

impl FromStr for EntityTag {
    type Err = InputDefect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "counterparty" => Ok(Self::Counterparty),
            "shared" => Ok(Self::Shared),
            other => Err(InputDefect::UnknownEntityTag {
                tag: other.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactStatus {
    /// Fully supported by the cited evidence
    Documented,
    /// Evidence covers only part of the claim
    Partial,
    /// Recorded as a known absence
    Gap,
    /// Terminal: rejected by review; kept queryable, never deleted
    Rejected,
}

/// Source document reference plus the exact quoted span.
///
/// The quote is what makes a fact auditable; merging documents must never
/// drop it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Stable reference to the source document (path, URL or registry key)
    pub source_doc: String,
    /// Exact span quoted from the source
    pub quote: String,
}

impl Evidence {
    /// Create evidence from a document reference and quote.
    pub fn new(source_doc: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            source_doc: source_doc.into(),
            quote: quote.into(),
        }
    }

    /// Check the mandatory creation-time precondition.
    ///
    /// # Errors
    /// `InputDefect::MissingEvidence` when either half is blank.
    pub fn require_traceable(&self) -> Result<(), InputDefect> {
        if self.source_doc.trim().is_empty() || self.quote.trim().is_empty() {
            return Err(InputDefect::MissingEvidence);
        }
        Ok(())
    }
}

/// Relationship between two facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Near-duplicate of another fact
    Overlap,
    /// Materially disagrees with another fact
    Conflict,
    /// Newer fact that replaces this one
    Supersedes,
}

/// Directed edge from one fact to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactLink {
    /// The related fact
    pub target: FactId,
    /// Nature of the relationship
    pub kind: LinkKind,
}

/// An atomic observation extracted from source documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Stable, domain-scoped identifier
    pub id: FactId,
    /// Run this fact was produced in
    pub run_id: RunId,
    /// Subject-matter domain, e.g. `network`
    pub domain: String,
    /// Category within the domain, e.g. `firewalls`
    pub category: String,
    /// Which party the fact describes
    pub entity: EntityTag,
    /// Short item text, e.g. the asset or vendor name
    pub item: String,
    /// Structured attributes (version, count, deployment mode, ...)
    pub details: serde_json::Map<String, serde_json::Value>,
    /// Lifecycle status
    pub status: FactStatus,
    /// Source reference and quoted span
    pub evidence: Evidence,
    /// Extraction confidence in `[0.0, 1.0]`
    pub confidence: f64,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Overlap/conflict/supersede edges to other facts
    pub links: Vec<FactLink>,
}

impl Fact {
    /// Fetch a quantitative detail as `f64`, accepting numbers or numeric
    /// strings ("250 users" does not count; "250" does).
    #[must_use]
    pub fn numeric_detail(&self, key: &str) -> Option<f64> {
        match self.details.get(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// True once the fact has reached its terminal rejected status.
    #[inline]
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.status == FactStatus::Rejected
    }

    /// Append a relationship edge, ignoring exact duplicates.
    pub fn link(&mut self, target: FactId, kind: LinkKind) {
        let edge = FactLink { target, kind };
        if !self.links.contains(&edge) {
            self.links.push(edge);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_tag_parses_known() {
        assert_eq!("primary".parse::<EntityTag>().unwrap(), EntityTag::Primary);
        assert_eq!(
            "counterparty".parse::<EntityTag>().unwrap(),
            EntityTag::Counterparty
        );
    }

    #[test]
    fn entity_tag_rejects_unknown() {
        let err = "target".parse::<EntityTag>().unwrap_err();
        assert!(matches!(err, InputDefect::UnknownEntityTag { tag } if tag == "target"));
    }

    #[test]
    fn evidence_requires_both_halves() {
        assert!(Evidence::new("doc.pdf", "the quote").require_traceable().is_ok());
        assert!(Evidence::new("", "the quote").require_traceable().is_err());
        assert!(Evidence::new("doc.pdf", "  ").require_traceable().is_err());
    }

    #[test]
    fn link_dedupes_edges() {
        let mut fact = crate::test_fixtures::fact("net", "firewalls", "ASA 5500");
        let other = FactId::new("net", 99);
        fact.link(other.clone(), LinkKind::Overlap);
        fact.link(other, LinkKind::Overlap);
        assert_eq!(fact.links.len(), 1);
    }

    #[test]
    fn numeric_detail_parses_numbers_and_strings() {
        let mut fact = crate::test_fixtures::fact("net", "firewalls", "ASA 5500");
        fact.details
            .insert("count".into(), serde_json::Value::from(12));
        fact.details
            .insert("ports".into(), serde_json::Value::from("48"));
        fact.details
            .insert("mode".into(), serde_json::Value::from("HA pair"));
        assert_eq!(fact.numeric_detail("count"), Some(12.0));
        assert_eq!(fact.numeric_detail("ports"), Some(48.0));
        assert_eq!(fact.numeric_detail("mode"), None);
    }
}
