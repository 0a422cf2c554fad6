//! In-crate test fixtures. External crates use `kip-test-utils` instead.

use crate::fact::{EntityTag, Evidence, Fact, FactStatus};
use crate::ids::{FactId, RunId};
use chrono::Utc;

pub(crate) fn fact(domain: &str, category: &str, item: &str) -> Fact {
    Fact {
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
    }
}
