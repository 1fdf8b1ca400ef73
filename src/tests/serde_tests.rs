// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::{alice, state, tx};
use crate::request::CommitRequest;
use crate::result::{NotaryError, StateConsumptionDetails, UniquenessResult};
use crate::types::{SecureHash, TimeWindow};
use std::collections::BTreeMap;
use std::string::ToString;

#[test]
fn test_secure_hash_is_hex_in_json() {
    let id = tx(1);
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, std::format!("\"{}\"", id.to_hex()));
    assert_eq!(serde_json::from_str::<SecureHash>(&json).unwrap(), id);

    assert!(serde_json::from_str::<SecureHash>("\"abcd\"").is_err());
}

#[test]
fn test_conflict_survives_json() {
    let mut consumed = BTreeMap::new();
    consumed.insert(state(1, 0), StateConsumptionDetails::input(tx(1)));
    consumed.insert(state(2, 3), StateConsumptionDetails::reference(tx(7)));
    let result = UniquenessResult::Failure(NotaryError::Conflict { tx_id: tx(2), consumed_states: consumed });

    let json = serde_json::to_string(&result).unwrap();
    let back: UniquenessResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
    assert_eq!(back.outcome(), "conflict");
}

#[test]
fn test_request_json_shape() {
    let request = CommitRequest::new(vec![state(1, 0)], tx(1), alice())
        .with_time_window(TimeWindow::from_only(5));
    let value = serde_json::to_value(&request).unwrap();

    assert_eq!(value["caller"], "O=Alice,L=London,C=GB");
    assert_eq!(value["tx_id"], tx(1).to_hex());
    assert_eq!(value["time_window"]["from_time"], 5);
    assert!(value["time_window"]["until_time"].is_null());
}

#[test]
fn test_state_ref_display() {
    let s = state(4, 2);
    assert_eq!(s.to_string(), std::format!("{}(2)", s.txhash));
}
