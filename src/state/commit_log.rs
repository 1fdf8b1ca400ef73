// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Commit-log state.
//!
//! The authoritative `StateRef → ConsumingTxInfo` map, the set of notarised
//! transactions and the request log, held in ordered collections so that
//! iteration (hashing, snapshots) is identical on every replica.
//!
//! # Invariants
//! - An entry, once inserted, is never overwritten or removed
//! - `apply` is a pure function of (state, command)
//! - Every `Commit` command appends exactly one request record

use crate::commit::{decide, CommitIndex, Decision};
use crate::request::{CommitRequest, RequestRecord};
use crate::result::UniquenessResult;
use crate::state::command::Command;
use crate::types::{ConsumingTxInfo, SecureHash, StateRef};
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::convert::Infallible;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitLogState {
    pub(crate) committed: BTreeMap<StateRef, ConsumingTxInfo>,
    pub(crate) notarised: BTreeSet<SecureHash>,
    pub(crate) requests: Vec<RequestRecord>,
    /// Commands applied so far, including no-ops.
    pub(crate) applied: u64,
}

impl CommitLogState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from decoded parts (snapshot restore).
    pub fn from_parts(
        committed: BTreeMap<StateRef, ConsumingTxInfo>,
        notarised: BTreeSet<SecureHash>,
        requests: Vec<RequestRecord>,
        applied: u64,
    ) -> Self {
        Self { committed, notarised, requests, applied }
    }

    // --- Read APIs ---

    pub fn get(&self, state: &StateRef) -> Option<&ConsumingTxInfo> {
        self.committed.get(state)
    }

    pub fn committed(&self) -> &BTreeMap<StateRef, ConsumingTxInfo> {
        &self.committed
    }

    pub fn notarised(&self) -> &BTreeSet<SecureHash> {
        &self.notarised
    }

    pub fn requests(&self) -> &[RequestRecord] {
        &self.requests
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    // --- Write Logic ---

    /// Apply one command. `Noop` yields `None`.
    pub fn apply(&mut self, command: &Command) -> Option<UniquenessResult> {
        self.applied += 1;
        match command {
            Command::Commit { request, request_time } => Some(self.commit(request, *request_time)),
            Command::Noop => None,
        }
    }

    /// Record the attempt, decide it, and insert on acceptance.
    pub fn commit(&mut self, request: &CommitRequest, now: u64) -> UniquenessResult {
        self.settle(request, now).into_result()
    }

    /// Like `commit`, returning the full decision.
    pub fn settle(&mut self, request: &CommitRequest, now: u64) -> Decision {
        self.requests.push(request.record(now));

        let decision = match decide(request, now, &*self) {
            Ok(d) => d,
            Err(never) => match never {},
        };

        if let Decision::Accept { inserts, .. } = &decision {
            for (state, info) in inserts {
                // decide() only lists absent states
                self.committed.entry(*state).or_insert_with(|| info.clone());
            }
            self.notarised.insert(request.tx_id);
        }

        decision
    }
}

impl CommitIndex for CommitLogState {
    type Error = Infallible;

    fn consumer_of(&self, state: &StateRef) -> Result<Option<SecureHash>, Infallible> {
        Ok(self.committed.get(state).map(|info| info.consuming_tx))
    }

    fn is_notarised(&self, tx_id: &SecureHash) -> Result<bool, Infallible> {
        Ok(self.notarised.contains(tx_id))
    }

    fn has_consumed_outputs(&self, tx_id: &SecureHash) -> Result<bool, Infallible> {
        let first = StateRef::new(*tx_id, 0);
        let last = StateRef::new(*tx_id, u32::MAX);
        Ok(self.committed.range(first..=last).next().is_some())
    }
}
