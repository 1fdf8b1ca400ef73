// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Commit requests and the audit records they leave behind.

use crate::types::{Party, RequestSignature, SecureHash, StateRef, TimeWindow};
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Everything a caller hands to `commit`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Inputs this transaction consumes.
    pub states: Vec<StateRef>,
    /// States read but not consumed.
    pub references: Vec<StateRef>,
    pub tx_id: SecureHash,
    pub caller: Party,
    pub signature: RequestSignature,
    pub time_window: Option<TimeWindow>,
}

impl CommitRequest {
    pub fn new(states: Vec<StateRef>, tx_id: SecureHash, caller: Party) -> Self {
        Self {
            states,
            references: Vec::new(),
            tx_id,
            caller,
            signature: RequestSignature::default(),
            time_window: None,
        }
    }

    pub fn with_references(mut self, references: Vec<StateRef>) -> Self {
        self.references = references;
        self
    }

    pub fn with_time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    pub fn with_signature(mut self, signature: RequestSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Audit entry for this attempt.
    pub fn record(&self, request_time: u64) -> RequestRecord {
        RequestRecord {
            consuming_tx: self.tx_id,
            requesting_party: self.caller.clone(),
            request_signature: self.signature.clone(),
            request_time,
        }
    }
}

/// One row of the notary request log. Written for every attempt,
/// successful or not, and never removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub consuming_tx: SecureHash,
    pub requesting_party: Party,
    pub request_signature: RequestSignature,
    pub request_time: u64,
}
