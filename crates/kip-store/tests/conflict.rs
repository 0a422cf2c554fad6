//! Unit tests for `ConflictCheck`, hosted as an integration test so the
//! `kip-test-utils` helpers (which link `kip-store` as an external crate)
//! share the same crate instance as the code under test.

use kip_core::EntityTag;
use kip_store::ConflictCheck;
use kip_test_utils::FactBuilder;

#[test]
fn identical_details_are_consistent() {
    let a = FactBuilder::new("net", "firewalls", "ASA 5516")
        .detail("version", "9.8")
        .build();
    let b = FactBuilder::new("net", "firewalls", "ASA 5516")
        .detail("version", "9.8")
        .entity(EntityTag::Counterparty)
        .build();
    assert_eq!(ConflictCheck::compare(&a, &b), ConflictCheck::Consistent);
}

#[test]
fn version_mismatch_conflicts() {
    let a = FactBuilder::new("net", "firewalls", "ASA 5516")
        .detail("version", "9.8")
        .build();
    let b = FactBuilder::new("net", "firewalls", "ASA 5516")
        .detail("version", "9.2")
        .entity(EntityTag::Counterparty)
        .build();
    let check = ConflictCheck::compare(&a, &b);
    assert!(check.is_conflicting());
}

#[test]
fn multiple_attributes_compared() {
    let a = FactBuilder::new("net", "firewalls", "ASA 5516")
        .detail("version", "9.8")
        .detail("deployment_mode", "HA pair")
        .detail_num("count", 4.0)
        .build();
    let b = FactBuilder::new("net", "firewalls", "ASA 5516")
        .detail("version", "9.8")
        .detail("deployment_mode", "standalone")
        .detail_num("count", 12.0)
        .build();
    match ConflictCheck::compare(&a, &b) {
        ConflictCheck::Conflicting { disagreements } => {
            assert_eq!(disagreements.len(), 2);
        }
        ConflictCheck::Consistent => panic!("expected conflict"),
    }
}

#[test]
fn numeric_tolerance_allows_small_drift() {
    let a = FactBuilder::new("hr", "headcount", "engineering")
        .detail_num("count", 100.0)
        .build();
    let b = FactBuilder::new("hr", "headcount", "engineering")
        .detail_num("count", 105.0)
        .build();
    assert_eq!(ConflictCheck::compare(&a, &b), ConflictCheck::Consistent);
}

#[test]
fn missing_fields_do_not_conflict() {
    let a = FactBuilder::new("net", "firewalls", "ASA 5516")
        .detail("version", "9.8")
        .build();
    let b = FactBuilder::new("net", "firewalls", "ASA 5516").build();
    assert_eq!(ConflictCheck::compare(&a, &b), ConflictCheck::Consistent);
}
