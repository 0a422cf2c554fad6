//! Conflict detection
//!
//! Two facts about the same item conflict when they materially disagree:
//! across entity tags (the two parties describe the same asset differently)
//! or on quantitative values. The comparison deliberately looks at several
//! attributes - version, deployment mode and scale fields - not just the
//! item name.

use kip_core::Fact;

/// Relative difference above which two numeric values count as disagreement.
const NUMERIC_TOLERANCE: f64 = 0.10;

/// String-valued detail fields compared verbatim.
const STRING_FIELDS: &[&str] = &["version", "deployment_mode", "edition", "owner"];

/// Numeric detail fields compared with relative tolerance.
const NUMERIC_FIELDS: &[&str] = &["count", "scale", "seats", "users", "endpoints", "capacity"];

/// Outcome of comparing two facts about the same item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCheck {
    /// No material disagreement
    Consistent,
    /// Material disagreement on the named fields
    Conflicting {
        /// Fields that disagree, with both values rendered for the gap text
        disagreements: Vec<String>,
    },
}

impl ConflictCheck {
    /// Compare two facts that share a normalized item key.
    #[must_use]
    pub fn compare(a: &Fact, b: &Fact) -> Self {
        let mut disagreements = Vec::new();

        for field in STRING_FIELDS {
            let va = a.details.get(*field).and_then(|v| v.as_str());
            let vb = b.details.get(*field).and_then(|v| v.as_str());
            if let (Some(va), Some(vb)) = (va, vb) {
                if !va.eq_ignore_ascii_case(vb) {
                    disagreements.push(format!("{field}: `{va}` vs `{vb}`"));
                }
            }
        }

        for field in NUMERIC_FIELDS {
            if let (Some(na), Some(nb)) = (a.numeric_detail(field), b.numeric_detail(field)) {
                if materially_different(na, nb) {
                    disagreements.push(format!("{field}: {na} vs {nb}"));
                }
            }
        }

        // Cross-party status disagreement: one side documents the item, the
        // other records it as absent.
        if a.entity != b.entity && a.status != b.status {
            use kip_core::FactStatus::*;
            if matches!((a.status, b.status), (Documented, Gap) | (Gap, Documented)) {
                disagreements.push(format!("status: {:?} vs {:?}", a.status, b.status));
            }
        }

        if disagreements.is_empty() {
            Self::Consistent
        } else {
            Self::Conflicting { disagreements }
        }
    }

    /// True when the comparison found disagreements.
    #[inline]
    #[must_use]
    pub fn is_conflicting(&self) -> bool {
        matches!(self, Self::Conflicting { .. })
    }
}

fn materially_different(a: f64, b: f64) -> bool {
    let base = a.abs().max(b.abs());
    if base == 0.0 {
        return false;
    }
    (a - b).abs() / base > NUMERIC_TOLERANCE
}
