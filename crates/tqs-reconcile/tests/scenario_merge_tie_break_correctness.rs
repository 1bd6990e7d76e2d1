//! Scenario: Merge tie-break correctness
//!
//! # Invariants under test
//!
//! 1. Higher timestamp wins outright, regardless of place counts.
//! 2. Equal timestamp: more places wins (either direction).
//! 3. Equal timestamp and equal place count: remote wins.
//! 4. Server newer: merged result is entirely the server's.
//! 5. Equal timestamp, local has more places: local wins, no resync.
//! 6. Merge is deterministic for fixed inputs.
//!
//! All tests are pure in-process; no IO.

use tqs_reconcile::{merge_quiz_results, MergeSource};
use tqs_schemas::{Place, QuizResult, TravelType};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn p(id: &str) -> Place {
    Place::new(id, id.to_uppercase())
}

fn result(code: &str, places: &[&str], ts: i64) -> QuizResult {
    QuizResult::new(
        Some(TravelType::new(code, code)),
        places.iter().map(|id| p(id)).collect(),
        ts,
    )
}

// ---------------------------------------------------------------------------
// 1. Timestamp dominates
// ---------------------------------------------------------------------------

#[test]
fn higher_timestamp_wins_even_with_fewer_places() {
    let local = result("ADV01", &["p1", "p2", "p3"], 1_000);
    let remote = result("ADV02", &["p1"], 1_001);

    let out = merge_quiz_results(Some(&local), Some(&remote));
    assert_eq!(out.source, MergeSource::Remote);
    assert_eq!(out.result.unwrap().places.len(), 1);

    let local = result("ADV01", &[], 3_000);
    let remote = result("ADV02", &["p1", "p2"], 2_000);
    let out = merge_quiz_results(Some(&local), Some(&remote));
    assert_eq!(out.source, MergeSource::Local);
}

// ---------------------------------------------------------------------------
// 2. Places-count tie-break
// ---------------------------------------------------------------------------

#[test]
fn equal_timestamp_more_remote_places_picks_remote() {
    let local = result("ADV01", &["p1"], 500);
    let remote = result("ADV01", &["p1", "p2"], 500);
    let out = merge_quiz_results(Some(&local), Some(&remote));
    assert_eq!(out.source, MergeSource::Remote);
}

#[test]
fn equal_timestamp_reversed_counts_flip_to_local() {
    let local = result("ADV01", &["p1", "p2"], 500);
    let remote = result("ADV01", &["p1"], 500);
    let out = merge_quiz_results(Some(&local), Some(&remote));
    assert_eq!(out.source, MergeSource::Local);
}

// ---------------------------------------------------------------------------
// 3. Full tie favours the server
// ---------------------------------------------------------------------------

#[test]
fn full_tie_favours_remote() {
    let local = result("LOCAL", &["p1"], 500);
    let remote = result("REMOTE", &["p9"], 500);
    let out = merge_quiz_results(Some(&local), Some(&remote));
    assert_eq!(out.source, MergeSource::Remote, "tie must favour server");
    let merged = out.result.unwrap();
    assert_eq!(merged.travel_type_code(), Some("REMOTE"));
    assert_eq!(merged.places[0].id, "p9");
    assert!(!out.needs_resync);
}

#[test]
fn full_tie_with_empty_places_favours_remote() {
    let local = result("LOCAL", &[], 0);
    let remote = result("REMOTE", &[], 0);
    let out = merge_quiz_results(Some(&local), Some(&remote));
    assert_eq!(out.source, MergeSource::Remote);
}

// ---------------------------------------------------------------------------
// 4. Server has newer data
// ---------------------------------------------------------------------------

#[test]
fn server_newer_replaces_local() {
    let local = result("ADV01", &[], 1_000);
    let remote = result("ADV02", &["p1", "p2"], 2_000);

    let out = merge_quiz_results(Some(&local), Some(&remote));
    assert_eq!(out.source, MergeSource::Remote);
    assert!(!out.needs_resync);

    let merged = out.result.unwrap();
    assert_eq!(merged.travel_type_code(), Some("ADV02"));
    assert_eq!(
        merged.places.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
        vec!["p1", "p2"]
    );
    assert_eq!(merged.timestamp, 2_000);
}

// ---------------------------------------------------------------------------
// 5. Local wins on places at equal timestamp -> no resync
// ---------------------------------------------------------------------------

#[test]
fn local_wins_on_places_without_resync() {
    let local = result("ADV01", &["p1", "p2"], 500);
    let remote = result("ADV01", &["p1"], 500);

    let out = merge_quiz_results(Some(&local), Some(&remote));
    assert_eq!(out.source, MergeSource::Local);
    assert!(
        !out.needs_resync,
        "equal timestamps never flag resync, even when local wins"
    );
    assert_eq!(out.result.unwrap().places.len(), 2);
}

// ---------------------------------------------------------------------------
// 6. Determinism
// ---------------------------------------------------------------------------

#[test]
fn merge_is_deterministic() {
    let cases = [
        (result("A", &["p1"], 10), result("B", &["p1", "p2"], 10)),
        (result("A", &["p1", "p2"], 10), result("B", &["p1"], 10)),
        (result("A", &[], 30), result("B", &["p1"], 20)),
        (result("A", &["p1"], 20), result("B", &[], 30)),
    ];
    for (l, r) in cases.iter() {
        let a = merge_quiz_results(Some(l), Some(r));
        let b = merge_quiz_results(Some(l), Some(r));
        assert_eq!(a, b);
    }
}
