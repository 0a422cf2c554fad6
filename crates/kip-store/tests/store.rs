//! Unit tests for `KnowledgeStore`, hosted as an integration test so the
//! `kip-test-utils` helpers (which link `kip-store` as an external crate)
//! share the same crate instance as the store under test.

use kip_core::{
    AuditAction, EntityTag, FactId, FlagSeverity, GapKind, InputDefect, KipError, LinkKind, RunId,
};
use kip_store::{CitationMode, FactAcceptance, FindingAcceptance, KnowledgeStore};
use kip_test_utils::{fact_with_run, finding_citing, FactBuilder};
use pretty_assertions::assert_eq;

fn store() -> KnowledgeStore {
    KnowledgeStore::new()
}

#[test]
fn accepts_fact_and_audits() {
    let store = store();
    let fact = FactBuilder::new("net", "firewalls", "ASA 5516").build();
    let out = store.put_fact(fact.clone()).unwrap();
    assert!(matches!(out.value, FactAcceptance::Accepted { .. }));
    assert_eq!(out.events.len(), 1);
    assert_eq!(store.get_fact(&fact.id).unwrap().item, "ASA 5516");
    store.trail().verify_integrity().unwrap();
}

#[test]
fn rejects_fact_without_evidence() {
    let store = store();
    let fact = FactBuilder::new("net", "firewalls", "ASA 5516")
        .no_evidence()
        .build();
    let err = store.put_fact(fact).unwrap_err();
    assert!(matches!(
        err,
        KipError::Input(InputDefect::MissingEvidence)
    ));
}

#[test]
fn identical_key_duplicate_keeps_higher_confidence() {
    let store = store();
    let run = RunId::new();
    let low = fact_with_run(&store, run, "net", "firewalls", "Palo Alto PA-220", 0.6);
    store.put_fact(low.clone()).unwrap();

    let mut high = fact_with_run(&store, run, "net", "firewalls", "palo alto PA 220", 0.9);
    high.details = low.details.clone();
    let out = store.put_fact(high.clone()).unwrap();

    match out.value {
        FactAcceptance::Duplicate { kept, discarded } => {
            assert_eq!(kept, high.id);
            assert_eq!(discarded, low.id);
        }
        other => panic!("expected duplicate, got {other:?}"),
    }
    // Merge is audited, never silent.
    assert!(out
        .events
        .iter()
        .any(|e| e.event.action == AuditAction::DuplicateMerged));
}

#[test]
fn losing_duplicate_survives_in_link_and_audit_not_as_a_row() {
    let store = store();
    let run = RunId::new();
    let high = fact_with_run(&store, run, "net", "firewalls", "Palo Alto PA-220", 0.9);
    store.put_fact(high.clone()).unwrap();

    let mut low = fact_with_run(&store, run, "net", "firewalls", "palo alto PA 220", 0.4);
    low.details = high.details.clone();
    let out = store.put_fact(low.clone()).unwrap();

    match out.value {
        FactAcceptance::Duplicate { kept, discarded } => {
            assert_eq!(kept, high.id);
            assert_eq!(discarded, low.id);
        }
        other => panic!("expected duplicate, got {other:?}"),
    }
    // The loser never becomes a stored fact of its own.
    assert!(store.get_fact(&low.id).is_none());
    // Its ID survives on the retained fact's supersede edge and in the
    // merge audit event.
    let kept = store.get_fact(&high.id).unwrap();
    assert!(kept
        .links
        .iter()
        .any(|l| l.kind == LinkKind::Supersedes && l.target == low.id));
    assert!(out.events.iter().any(|e| {
        e.event.action == AuditAction::DuplicateMerged
            && e.event.detail.contains(low.id.as_str())
    }));
}

#[test]
fn restore_reseeds_allocators_and_dedup_index() {
    let run = RunId::new();
    let first = KnowledgeStore::new();
    let fact = fact_with_run(&first, run, "net", "firewalls", "core switch", 0.8);
    first.put_fact(fact.clone()).unwrap();

    // A fresh store hydrated from durable rows must not hand out the
    // restored ID again, and must still dedup against the restored item.
    let fresh = KnowledgeStore::new();
    fresh.restore_fact(fact.clone());
    assert_eq!(fresh.get_fact(&fact.id).unwrap().item, "core switch");
    assert_eq!(fresh.allocate_fact_id("net").as_str(), "F-NET-002");

    let mut again = fact_with_run(&fresh, run, "net", "firewalls", "Core Switch", 0.8);
    again.details = fact.details.clone();
    let out = fresh.put_fact(again).unwrap();
    assert!(matches!(
        out.value,
        FactAcceptance::Duplicate { kept, .. } if kept == fact.id
    ));
}

#[test]
fn cross_entity_disagreement_emits_conflict_gap() {
    let store = store();
    let run = RunId::new();
    let a = FactBuilder::new("a", "tooling", "X")
        .run(run)
        .id(store.allocate_fact_id("a"))
        .detail("version", "1.0")
        .build();
    let b = FactBuilder::new("a", "tooling", "X")
        .run(run)
        .id(store.allocate_fact_id("a"))
        .entity(EntityTag::Counterparty)
        .detail("version", "2.0")
        .build();

    store.put_fact(a.clone()).unwrap();
    let out = store.put_fact(b.clone()).unwrap();

    let gap_id = match out.value {
        FactAcceptance::Conflict { gap_id, .. } => gap_id,
        other => panic!("expected conflict, got {other:?}"),
    };
    let gap = store.get_gap(&gap_id).unwrap();
    assert_eq!(gap.kind, GapKind::Conflict);
    assert!(gap.related_facts.contains(&a.id));
    assert!(gap.related_facts.contains(&b.id));
    // Both facts retained and cross-linked.
    assert!(store
        .get_fact(&a.id)
        .unwrap()
        .links
        .iter()
        .any(|l| l.kind == LinkKind::Conflict));
}

#[test]
fn finding_with_invalid_citation_rejected_fail_fast() {
    let store = store();
    let run = RunId::new();
    let ghost = FactId::new("x", 999);
    let finding = finding_citing(&store, run, "x", vec![ghost.clone()]);

    let err = store.put_finding(finding, CitationMode::FailFast).unwrap_err();
    assert!(matches!(
        err,
        KipError::Input(InputDefect::InvalidCitation { fact_id }) if fact_id == ghost
    ));
    // Never visible in queries.
    assert!(store.findings_by_kind(run, "risk").is_empty());
}

#[test]
fn finding_with_invalid_citation_flagged_permissive() {
    let store = store();
    let run = RunId::new();
    let real = fact_with_run(&store, run, "x", "c", "real item", 0.9);
    store.put_fact(real.clone()).unwrap();
    let finding = finding_citing(&store, run, "x", vec![real.id, FactId::new("x", 999)]);
    let id = finding.id.clone();

    let out = store
        .put_finding(finding, CitationMode::Permissive)
        .unwrap();
    match out.value {
        FindingAcceptance::AcceptedWithFlags { flags, .. } => {
            assert_eq!(flags[0].code, "unverified_citations");
        }
        other => panic!("expected flags, got {other:?}"),
    }
    assert!(store.get_finding(&id).is_some());
    assert_eq!(store.flags_by_severity(run, FlagSeverity::Warning).len(), 1);
}

#[test]
fn citation_to_rejected_fact_is_invalid() {
    let store = store();
    let run = RunId::new();
    let fact = fact_with_run(&store, run, "x", "c", "item", 0.9);
    store.put_fact(fact.clone()).unwrap();
    store.reject_fact(&fact.id, "reviewer:bob", "fabricated").unwrap();

    let finding = finding_citing(&store, run, "x", vec![fact.id]);
    assert!(store.put_finding(finding, CitationMode::FailFast).is_err());
}

#[test]
fn find_citing_uses_reverse_index() {
    let store = store();
    let run = RunId::new();
    let fact = fact_with_run(&store, run, "x", "c", "item", 0.9);
    store.put_fact(fact.clone()).unwrap();
    let finding = finding_citing(&store, run, "x", vec![fact.id.clone()]);
    let fid = finding.id.clone();
    store.put_finding(finding, CitationMode::FailFast).unwrap();

    let citing = store.find_citing(&fact.id);
    assert_eq!(citing.len(), 1);
    assert_eq!(citing[0].id, fid);
}

#[test]
fn correction_preserves_original() {
    let store = store();
    let fact = FactBuilder::new("net", "firewalls", "ASA")
        .detail("version", "9.2")
        .build();
    store.put_fact(fact.clone()).unwrap();

    let out = store
        .correct_fact(
            &fact.id,
            "details.version",
            serde_json::json!("9.8"),
            "reviewer:alice",
            "vendor confirmed",
        )
        .unwrap();
    assert_eq!(out.value.original, serde_json::json!("9.2"));
    assert_eq!(store.corrections().len(), 1);
    assert_eq!(
        store.get_fact(&fact.id).unwrap().details["version"],
        serde_json::json!("9.8")
    );
}

#[test]
fn same_id_double_put_is_update_not_duplicate() {
    let store = store();
    let fact = FactBuilder::new("net", "firewalls", "ASA").build();
    store.put_fact(fact.clone()).unwrap();
    let out = store.put_fact(fact.clone()).unwrap();
    assert!(matches!(out.value, FactAcceptance::Accepted { .. }));
    assert_eq!(store.facts_by_domain(fact.run_id, "net").len(), 1);
}

#[test]
fn id_allocation_is_monotonic_per_domain() {
    let store = store();
    assert_eq!(store.allocate_fact_id("net").as_str(), "F-NET-001");
    assert_eq!(store.allocate_fact_id("net").as_str(), "F-NET-002");
    assert_eq!(store.allocate_fact_id("hr").as_str(), "F-HR-001");
}
