// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::{alice, state, tx};
use crate::commit::{decide, CommitIndex, Decision};
use crate::request::CommitRequest;
use crate::result::{ConsumedStateType, NotaryError};
use crate::types::{SecureHash, StateRef, TimeWindow};
use std::collections::{BTreeMap, BTreeSet};
use std::vec::Vec;

/// Plain map index used to drive `decide` directly.
#[derive(Default)]
struct MapIndex {
    consumed: BTreeMap<StateRef, SecureHash>,
    notarised: BTreeSet<SecureHash>,
}

impl CommitIndex for MapIndex {
    type Error = ();

    fn consumer_of(&self, state: &StateRef) -> Result<Option<SecureHash>, ()> {
        Ok(self.consumed.get(state).copied())
    }

    fn is_notarised(&self, tx_id: &SecureHash) -> Result<bool, ()> {
        Ok(self.notarised.contains(tx_id))
    }

    fn has_consumed_outputs(&self, tx_id: &SecureHash) -> Result<bool, ()> {
        Ok(self.consumed.keys().any(|s| s.txhash == *tx_id))
    }
}

/// Index whose reads always fail, to prove errors propagate untouched.
struct BrokenIndex;

impl CommitIndex for BrokenIndex {
    type Error = &'static str;

    fn consumer_of(&self, _: &StateRef) -> Result<Option<SecureHash>, &'static str> {
        Err("disk on fire")
    }

    fn is_notarised(&self, _: &SecureHash) -> Result<bool, &'static str> {
        Ok(false)
    }
}

#[test]
fn test_accept_lists_every_unclaimed_input() {
    let index = MapIndex::default();
    let request = CommitRequest::new(vec![state(1, 0), state(1, 1)], tx(1), alice());

    match decide(&request, 0, &index).unwrap() {
        Decision::Accept { inserts, .. } => {
            assert_eq!(inserts.len(), 2);
            assert_eq!(inserts[0].0, state(1, 0));
            assert_eq!(inserts[0].1.input_index, 0);
            assert_eq!(inserts[1].1.input_index, 1);
            assert_eq!(inserts[1].1.consuming_tx, tx(1));
            assert_eq!(inserts[1].1.requesting_party, alice());
        }
        other => panic!("expected accept, got {:?}", other),
    }
}

#[test]
fn test_same_transaction_is_not_a_conflict() {
    let mut index = MapIndex::default();
    index.consumed.insert(state(1, 0), tx(1));

    let request = CommitRequest::new(vec![state(1, 0), state(1, 1)], tx(1), alice());
    match decide(&request, 0, &index).unwrap() {
        Decision::Accept { inserts, .. } => {
            // Only the missing state is inserted
            assert_eq!(inserts.len(), 1);
            assert_eq!(inserts[0].0, state(1, 1));
            assert_eq!(inserts[0].1.input_index, 1);
        }
        other => panic!("expected accept, got {:?}", other),
    }
}

#[test]
fn test_input_conflict_cites_hash_of_consumer() {
    let mut index = MapIndex::default();
    index.consumed.insert(state(1, 0), tx(1));

    let request = CommitRequest::new(vec![state(1, 0), state(2, 0)], tx(2), alice());
    let result = decide(&request, 0, &index).unwrap().into_result();

    let conflicts = result.conflicts().expect("conflict");
    assert_eq!(conflicts.len(), 1);
    let details = conflicts[&state(1, 0)];
    assert_eq!(details.kind, ConsumedStateType::InputState);
    assert_eq!(details.hash_of_transaction_id, tx(1).rehash());
    assert!(details.cites(&tx(1)));
}

#[test]
fn test_reference_conflict_is_typed() {
    let mut index = MapIndex::default();
    index.consumed.insert(state(9, 0), tx(1));

    let request = CommitRequest::new(vec![], tx(2), alice()).with_references(vec![state(9, 0)]);
    let result = decide(&request, 0, &index).unwrap().into_result();

    let conflicts = result.conflicts().expect("conflict");
    assert_eq!(conflicts[&state(9, 0)].kind, ConsumedStateType::ReferenceInputState);
}

#[test]
fn test_unclaimed_reference_is_never_inserted() {
    let index = MapIndex::default();
    let request = CommitRequest::new(vec![state(1, 0)], tx(2), alice())
        .with_references(vec![state(9, 0)]);

    match decide(&request, 0, &index).unwrap() {
        Decision::Accept { inserts, .. } => {
            assert_eq!(inserts.len(), 1);
            assert!(inserts.iter().all(|(s, _)| *s != state(9, 0)));
        }
        other => panic!("expected accept, got {:?}", other),
    }
}

#[test]
fn test_input_conflict_wins_over_reference_conflict() {
    let mut index = MapIndex::default();
    index.consumed.insert(state(5, 0), tx(1));

    let request = CommitRequest::new(vec![state(5, 0)], tx(2), alice())
        .with_references(vec![state(5, 0)]);
    let result = decide(&request, 0, &index).unwrap().into_result();

    let conflicts = result.conflicts().expect("conflict");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[&state(5, 0)].kind, ConsumedStateType::InputState);
}

#[test]
fn test_time_window_checked_before_log() {
    let mut index = MapIndex::default();
    index.consumed.insert(state(1, 0), tx(1));

    let window = TimeWindow::until_only(1_000);
    let request = CommitRequest::new(vec![state(1, 0)], tx(2), alice()).with_time_window(window);

    // Conflicting input, but the window is reported first
    match decide(&request, 5_000, &index).unwrap() {
        Decision::Reject(NotaryError::TimeWindowInvalid { current_time, tx_time_window }) => {
            assert_eq!(current_time, 5_000);
            assert_eq!(tx_time_window, window);
        }
        other => panic!("expected time window failure, got {:?}", other),
    }
}

#[test]
fn test_time_window_bounds() {
    let window = TimeWindow::between(100, 200);
    assert!(!window.contains(99));
    assert!(window.contains(100));
    assert!(window.contains(199));
    assert!(!window.contains(200));

    assert!(TimeWindow::from_only(100).contains(u64::MAX));
    assert!(TimeWindow::until_only(100).contains(0));
    assert!(!TimeWindow { from_time: None, until_time: None }.is_bounded());
}

#[test]
fn test_notarised_transaction_replays_without_checks() {
    let mut index = MapIndex::default();
    index.notarised.insert(tx(1));
    // Reference now consumed by someone else, window long gone
    index.consumed.insert(state(9, 0), tx(7));

    let request = CommitRequest::new(vec![], tx(1), alice())
        .with_references(vec![state(9, 0)])
        .with_time_window(TimeWindow::until_only(10));

    assert_eq!(decide(&request, 10_000, &index).unwrap(), Decision::AlreadyNotarised);
}

#[test]
fn test_duplicate_inputs_collapse() {
    let index = MapIndex::default();
    let request = CommitRequest::new(vec![state(1, 0), state(1, 0)], tx(1), alice());

    match decide(&request, 0, &index).unwrap() {
        Decision::Accept { inserts, .. } => {
            let states: Vec<_> = inserts.iter().map(|(s, _)| *s).collect();
            assert_eq!(states, vec![state(1, 0)]);
        }
        other => panic!("expected accept, got {:?}", other),
    }
}

#[test]
fn test_index_errors_propagate() {
    let request = CommitRequest::new(vec![state(1, 0)], tx(1), alice());
    assert_eq!(decide(&request, 0, &BrokenIndex), Err("disk on fire"));
}

#[test]
fn test_notarised_transaction_with_new_input_claims_it() {
    let mut index = MapIndex::default();
    index.notarised.insert(tx(1));
    index.consumed.insert(state(1, 0), tx(1));

    let request = CommitRequest::new(vec![state(1, 0), state(2, 0)], tx(1), alice());
    match decide(&request, 0, &index).unwrap() {
        Decision::Accept { inserts, fresh_outputs } => {
            let states: Vec<_> = inserts.iter().map(|(s, _)| *s).collect();
            assert_eq!(states, vec![state(2, 0)]);
            assert!(!fresh_outputs);
        }
        other => panic!("expected accept, got {:?}", other),
    }
}

#[test]
fn test_notarised_transaction_cannot_take_a_claimed_input() {
    let mut index = MapIndex::default();
    index.notarised.insert(tx(1));
    index.consumed.insert(state(1, 0), tx(1));
    index.consumed.insert(state(2, 0), tx(2));

    let request = CommitRequest::new(vec![state(1, 0), state(2, 0)], tx(1), alice());
    let result = decide(&request, 0, &index).unwrap().into_result();
    let conflicts = result.conflicts().expect("conflict");
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[&state(2, 0)].cites(&tx(2)));
}

#[test]
fn test_fresh_outputs_only_on_first_untouched_notarisation() {
    let mut index = MapIndex::default();
    let request = CommitRequest::new(vec![state(1, 0)], tx(5), alice());
    assert!(decide(&request, 0, &index).unwrap().fresh_outputs());

    // An output of tx(5) was spent before tx(5) itself showed up
    index.consumed.insert(StateRef::new(tx(5), 3), tx(6));
    assert!(!decide(&request, 0, &index).unwrap().fresh_outputs());

    // Default answer for indexes that cannot tell
    assert!(!decide(&request, 0, &BlindIndex).unwrap().fresh_outputs());
}

/// Index that only implements the required reads.
struct BlindIndex;

impl CommitIndex for BlindIndex {
    type Error = ();

    fn consumer_of(&self, _: &StateRef) -> Result<Option<SecureHash>, ()> {
        Ok(None)
    }

    fn is_notarised(&self, _: &SecureHash) -> Result<bool, ()> {
        Ok(false)
    }
}
