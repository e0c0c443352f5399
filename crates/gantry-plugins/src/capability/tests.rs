//! Unit tests for the capability gate.

use rstest::rstest;

use super::*;

fn set(tokens: &[&str]) -> CapabilitySet {
    tokens.iter().copied().collect()
}

// ---------------------------------------------------------------------------
// Set algebra
// ---------------------------------------------------------------------------

#[test]
fn duplicate_tokens_collapse() {
    let s = set(&["fs:read", "fs:read", "net:fetch"]);
    assert_eq!(s.len(), 2);
}

#[test]
fn difference_returns_unmatched_tokens() {
    let required = set(&["fs:read", "net:fetch"]);
    let granted = set(&["net:fetch"]);
    assert_eq!(required.difference(&granted), set(&["fs:read"]));
}

#[test]
fn serialises_as_sorted_array() {
    let s = set(&["net:fetch", "fs:read"]);
    let json = serde_json::to_string(&s).expect("serialise set");
    assert_eq!(json, r#"["fs:read","net:fetch"]"#);
}

// ---------------------------------------------------------------------------
// Gate semantics: check(R, G).ok == (R ⊆ G), missing == R \ G
// ---------------------------------------------------------------------------

#[rstest]
#[case::empty_requirement(&[], &[], true)]
#[case::empty_requirement_with_grants(&[], &["fs:read"], true)]
#[case::exact_match(&["fs:read"], &["fs:read"], true)]
#[case::superset_grant(&["fs:read"], &["fs:read", "net:fetch"], true)]
#[case::missing_token(&["fs:read"], &[], false)]
#[case::disjoint(&["fs:read"], &["fs:write"], false)]
#[case::partial(&["fs:read", "net:fetch"], &["net:fetch"], false)]
fn check_matches_subset_relation(
    #[case] required: &[&str],
    #[case] granted: &[&str],
    #[case] expected_ok: bool,
) {
    let required_set = set(required);
    let granted_set = set(granted);
    let check = CapabilityGate::check(&required_set, &granted_set);
    assert_eq!(check.ok, expected_ok);
    assert_eq!(check.ok, required_set.is_subset(&granted_set));
    assert_eq!(check.missing, required_set.difference(&granted_set));
}

#[test]
fn denial_reports_only_missing_tokens() {
    let check = CapabilityGate::check(&set(&["fs:read"]), &set(&["fs:write"]));
    assert!(!check.ok);
    assert_eq!(check.missing, set(&["fs:read"]));
}
